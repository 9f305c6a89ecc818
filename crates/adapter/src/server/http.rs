// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness and readiness probes. `/healthz` only confirms the process is
//! up; `/readyz` confirms the control-mode connection still talks to tmux.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::command;
use crate::server::state::Store;

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

pub async fn readyz(State(state): State<Arc<Store>>) -> impl IntoResponse {
    match command::list_sessions(&state.conn).await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "error": e.as_str()})),
        ),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
