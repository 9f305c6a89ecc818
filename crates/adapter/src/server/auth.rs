// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};

use crate::error::ErrorCode;
use crate::server::state::Store;

/// Constant-time string comparison, to avoid a timing side-channel on
/// token length/prefix.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token taken from `Authorization: Bearer <token>` or a
/// `?token=` query parameter. `Ok(())` when auth is disabled (`expected`
/// is `None`) or the supplied token matches.
pub fn validate_token(headers: &HeaderMap, query_token: Option<&str>, expected: Option<&str>) -> Result<(), ErrorCode> {
    let Some(expected) = expected else {
        return Ok(());
    };

    if let Some(token) = query_token {
        if constant_time_eq(token, expected) {
            return Ok(());
        }
    }

    if let Some(token) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if constant_time_eq(token, expected) {
            return Ok(());
        }
    }

    Err(ErrorCode::Unauthorized)
}

/// Match an `Origin` header value against a comma-split set of glob
/// patterns where `*` matches any run of characters.
pub fn origin_allowed(origin: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| glob_match(p, origin))
}

fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[u8], text: &[u8]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some(b'*') => {
                (0..=text.len()).any(|i| inner(&pattern[1..], &text[i..]))
            }
            Some(&p) => text.first().is_some_and(|&t| t == p) && inner(&pattern[1..], &text[1..]),
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

/// Middleware enforcing Bearer token auth on everything except `/ws`,
/// `/healthz`, and `/readyz`. The WebSocket upgrade validates its own
/// token and origin in [`crate::server::ws::ws_handler`], since it cannot
/// rely on a generic HTTP error response once upgraded.
pub async fn auth_layer(State(state): State<Arc<Store>>, req: Request<axum::body::Body>, next: Next) -> Response {
    let path = req.uri().path();
    if path == "/ws" || path == "/healthz" || path == "/readyz" {
        return next.run(req).await;
    }

    let query_token = req.uri().query().and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("token=").map(str::to_owned))
    });

    if let Err(code) = validate_token(req.headers(), query_token.as_deref(), state.config.auth_token.as_deref()) {
        return (
            code.http_status(),
            Json(serde_json::json!({"ok": false, "error": code.as_str()})),
        )
            .into_response();
    }

    next.run(req).await
}

pub fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"ok": false, "error": ErrorCode::Unauthorized.as_str()})),
    )
        .into_response()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
