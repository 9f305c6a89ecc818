// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::command;
use crate::control::ControlConnection;
use crate::model::Agent;

const PASTE_SETTLE: Duration = Duration::from_millis(500);
const ESCAPE_SETTLE: Duration = Duration::from_millis(100);
const ENTER_RETRY_BACKOFF: Duration = Duration::from_millis(200);
const ENTER_MAX_ATTEMPTS: u32 = 3;
const WAKE_DANCE_SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeFailure {
    AgentNotFound,
    SendLiteralFailed,
    SendEnterFailedAfterRetries,
}

/// Delivers prompts to agents with per-agent serialisation, so two prompts
/// aimed at the same agent never interleave their keystrokes.
pub struct SessionPromptDriver {
    conn: Arc<ControlConnection>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionPromptDriver {
    pub fn new(conn: Arc<ControlConnection>) -> Self {
        Self {
            conn,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire (creating if needed) the per-agent lock used to serialise
    /// prompt delivery and file-upload pastes against the same session.
    pub async fn lock_for(&self, agent: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(agent.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Best-effort delivery of a single prompt followed by a newline.
    pub async fn nudge(&self, agent: &Agent, prompt: &str) -> Result<(), NudgeFailure> {
        let lock = self.lock_for(&agent.name).await;
        let _guard = lock.lock().await;

        command::send_keys_literal(&self.conn, &agent.name, prompt)
            .await
            .map_err(|_| NudgeFailure::SendLiteralFailed)?;

        tokio::time::sleep(PASTE_SETTLE).await;

        if let Err(e) = command::send_keys_named(&self.conn, &agent.name, "Escape").await {
            warn!(agent = %agent.name, error = %e, "nudge escape send failed, continuing");
        }
        tokio::time::sleep(ESCAPE_SETTLE).await;

        let mut enter_sent = false;
        for attempt in 0..ENTER_MAX_ATTEMPTS {
            match command::send_keys_named(&self.conn, &agent.name, "Enter").await {
                Ok(()) => {
                    enter_sent = true;
                    break;
                }
                Err(e) => {
                    warn!(agent = %agent.name, attempt, error = %e, "nudge enter send failed");
                    if attempt + 1 < ENTER_MAX_ATTEMPTS {
                        tokio::time::sleep(ENTER_RETRY_BACKOFF).await;
                    }
                }
            }
        }
        if !enter_sent {
            return Err(NudgeFailure::SendEnterFailedAfterRetries);
        }

        if !agent.attached {
            self.wake_dance(agent).await;
        }

        Ok(())
    }

    /// Shrink-pause-grow trick used to force a detached session's client
    /// to repaint. Errors are logged, never returned.
    async fn wake_dance(&self, agent: &Agent) {
        let size = command::display_message(&self.conn, &agent.name, "#{window_width}x#{window_height}").await;
        let Ok(size) = size else {
            warn!(agent = %agent.name, "wake dance could not read window size");
            return;
        };
        let Some((cols, rows)) = size.trim().split_once('x').and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?))) else {
            warn!(agent = %agent.name, size, "wake dance could not parse window size");
            return;
        };
        if rows < 2 {
            return;
        }
        if let Err(e) = command::resize_window(&self.conn, &agent.name, cols, rows - 1).await {
            warn!(agent = %agent.name, error = %e, "wake dance shrink failed");
            return;
        }
        tokio::time::sleep(WAKE_DANCE_SETTLE).await;
        if let Err(e) = command::resize_window(&self.conn, &agent.name, cols, rows).await {
            warn!(agent = %agent.name, error = %e, "wake dance restore failed");
        }
    }
}

#[cfg(test)]
#[path = "nudge_tests.rs"]
mod tests;
