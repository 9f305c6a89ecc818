// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP/WebSocket surface: router assembly, shared state, and the wire
//! protocol used by both the JSON control channel and the binary output/
//! input frames.

pub mod auth;
pub mod http;
pub mod msg;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::server::state::Store;

/// Build the full axum [`Router`], wired with the auth middleware and a
/// CORS layer that mirrors the same `--allowed-origins` patterns.
pub fn build_router(state: Arc<Store>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::predicate({
            let state = state.clone();
            move |origin, _| {
                let Ok(origin) = origin.to_str() else { return false };
                auth::origin_allowed(origin, &state.config.allowed_origin_patterns())
            }
        }))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    let mut router = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(http::healthz))
        .route("/readyz", get(http::readyz));

    if let Ok(web_dir) = std::env::var("TMUX_ADAPTER_WEB_DIR") {
        router = router.nest_service("/tmux-adapter-web", ServeDir::new(web_dir));
    }

    router
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
