// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::control::ControlConnection;
use crate::nudge::SessionPromptDriver;
use crate::pipepane::PipePaneManager;
use crate::registry::AgentRegistry;

/// Shared application state passed to every handler via axum's `State`
/// extractor.
pub struct Store {
    pub conn: Arc<ControlConnection>,
    pub registry: Arc<AgentRegistry>,
    pub pipe_panes: Arc<PipePaneManager>,
    pub prompts: Arc<SessionPromptDriver>,
    pub config: Config,
    pub town_dir: PathBuf,
    pub lifecycle: LifecycleState,
}

/// Runtime lifecycle primitives shared across connections.
pub struct LifecycleState {
    pub shutdown: CancellationToken,
    pub ws_client_count: AtomicU32,
    next_client_id: AtomicU64,
}

impl LifecycleState {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            ws_client_count: AtomicU32::new(0),
            next_client_id: AtomicU64::new(1),
        }
    }

    pub fn next_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
