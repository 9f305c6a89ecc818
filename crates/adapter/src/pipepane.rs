// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::command;
use crate::control::ControlConnection;
use crate::error::ErrorCode;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);
const READ_CHUNK_SIZE: usize = 8192;

/// A unique handle for one subscriber's receiving end, used to remove it
/// from the fan-out set on unsubscribe.
pub type SubscriberId = u64;

struct PerAgent {
    spool_path: PathBuf,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Bytes>>,
    reader_task: CancellationToken,
    dropped_chunks: u64,
}

type SharedState = Arc<Mutex<HashMap<String, PerAgent>>>;

/// Owns every active `pipe-pane` tap: a spool file per subscribed agent,
/// one reader task per spool, and the fan-out from that reader to every
/// subscriber channel for the agent.
pub struct PipePaneManager {
    conn: Arc<ControlConnection>,
    spool_dir: PathBuf,
    state: SharedState,
    next_subscriber_id: AtomicU64,
}

impl PipePaneManager {
    pub fn new(conn: Arc<ControlConnection>, spool_dir: PathBuf) -> Self {
        Self {
            conn,
            spool_dir,
            state: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to an agent's output fan-out. Activates `pipe-pane` and
    /// spawns the reader task on the first subscriber for that agent.
    pub async fn subscribe(
        &self,
        agent: &str,
    ) -> Result<(SubscriberId, mpsc::Receiver<Bytes>), ErrorCode> {
        let mut state = self.state.lock().await;
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);

        if let Some(entry) = state.get_mut(agent) {
            entry.subscribers.insert(id, tx);
            return Ok((id, rx));
        }

        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(|_| ErrorCode::MultiplexerCommandFailed)?;
        let spool_path = self.spool_dir.join(format!("{agent}.spool"));
        // Truncate any stale spool from a prior run before piping into it.
        let _ = tokio::fs::remove_file(&spool_path).await;
        tokio::fs::File::create(&spool_path)
            .await
            .map_err(|_| ErrorCode::MultiplexerCommandFailed)?;

        command::pipe_pane_start(&self.conn, agent, &spool_path).await?;

        let cancel = CancellationToken::new();
        let mut subscribers = HashMap::new();
        subscribers.insert(id, tx);

        let entry = PerAgent {
            spool_path: spool_path.clone(),
            subscribers,
            reader_task: cancel.clone(),
            dropped_chunks: 0,
        };
        state.insert(agent.to_owned(), entry);
        drop(state);

        spawn_reader(agent.to_owned(), spool_path, self.state.clone(), cancel);
        Ok((id, rx))
    }

    /// Remove a subscriber. Deactivates `pipe-pane` and unlinks the spool
    /// once the agent's refcount drops to zero.
    pub async fn unsubscribe(&self, agent: &str, id: SubscriberId) {
        let mut state = self.state.lock().await;
        let is_empty = match state.get_mut(agent) {
            Some(entry) => {
                entry.subscribers.remove(&id);
                entry.subscribers.is_empty()
            }
            None => return,
        };
        let entry = if is_empty { state.remove(agent) } else { None };
        drop(state);

        let Some(entry) = entry else {
            return;
        };
        entry.reader_task.cancel();
        if let Err(e) = command::pipe_pane_stop(&self.conn, agent).await {
            warn!(agent, error = %e, "failed to deactivate pipe-pane");
        }
        let _ = tokio::fs::remove_file(&entry.spool_path).await;
    }

    /// Force-unsubscribe every channel for an agent, e.g. after the
    /// registry reports it removed.
    pub async fn force_unsubscribe_all(&self, agent: &str) {
        let mut state = self.state.lock().await;
        let Some(entry) = state.remove(agent) else {
            return;
        };
        drop(state);
        entry.reader_task.cancel();
        drop(entry.subscribers);
        if let Err(e) = command::pipe_pane_stop(&self.conn, agent).await {
            warn!(agent, error = %e, "failed to deactivate pipe-pane during reconciliation");
        }
        let _ = tokio::fs::remove_file(&entry.spool_path).await;
    }

    /// Count of chunks dropped so far for `agent` because a subscriber
    /// channel was full. Zero if the agent has no active subscription.
    pub async fn dropped_chunks(&self, agent: &str) -> u64 {
        self.state.lock().await.get(agent).map_or(0, |e| e.dropped_chunks)
    }
}

fn spawn_reader(agent: String, spool_path: PathBuf, state: SharedState, cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tail_spool(&agent, &spool_path, &state, &cancel).await {
            warn!(agent, error = %e, "pipe-pane reader exited with an error");
        }
    });
}

/// Tails `spool_path` from its current end, polling for growth, and fans
/// each chunk read out to every currently-registered subscriber for
/// `agent`. Delivery is non-blocking per subscriber: a full channel drops
/// the chunk and increments a logged counter rather than stalling the
/// reader.
async fn tail_spool(
    agent: &str,
    spool_path: &std::path::Path,
    state: &SharedState,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut file = tokio::fs::File::open(spool_path).await?;
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            n = file.read(&mut buf) => n?,
        };

        if n == 0 {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        let mut guard = state.lock().await;
        let Some(entry) = guard.get_mut(agent) else {
            return Ok(());
        };
        for tx in entry.subscribers.values() {
            if tx.try_send(chunk.clone()).is_err() {
                entry.dropped_chunks += 1;
                warn!(agent, dropped = entry.dropped_chunks, "pipe-pane subscriber dropped chunk");
            }
        }
    }
}

#[cfg(test)]
#[path = "pipepane_tests.rs"]
mod tests;
