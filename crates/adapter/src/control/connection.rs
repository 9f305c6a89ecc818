// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::control::framing::{Accept, BlockAccumulator};
use crate::error::ErrorCode;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// A live control-mode session against the multiplexer, bound to a dedicated
/// monitor session that exists solely to keep the connection alive.
///
/// Owns the child process and both of its framed standard streams. Commands
/// are serialised through `inner`: at most one is ever in flight.
pub struct ControlConnection {
    stdin: Mutex<ChildStdin>,
    pending: std::sync::Arc<Mutex<Option<PendingCommand>>>,
    next_command_number: AtomicU64,
    notifications: broadcast::Sender<String>,
    command_timeout: Duration,
    _child: Child,
    _reader_task: tokio::task::JoinHandle<()>,
}

struct PendingCommand {
    command_number: u64,
    reply: oneshot::Sender<Result<String, ErrorCode>>,
}

impl ControlConnection {
    /// Spawn the multiplexer bound to `monitor_session` in control mode and
    /// begin reading its framed output.
    pub async fn spawn(
        tmux_bin: &str,
        tmux_socket: Option<&std::path::Path>,
        monitor_session: &str,
        command_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut cmd = Command::new(tmux_bin);
        if let Some(socket) = tmux_socket {
            cmd.arg("-S").arg(socket);
        }
        cmd.args(["-CC", "new-session", "-A", "-s", monitor_session])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("control-mode child has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("control-mode child has no stdout"))?;

        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let (fatal_tx, fatal_rx) = mpsc::channel::<()>(1);

        let pending: std::sync::Arc<Mutex<Option<PendingCommand>>> =
            std::sync::Arc::new(Mutex::new(None));
        let reader_pending = pending.clone();
        let reader_notifications = notifications.clone();

        let reader_task = tokio::spawn(read_loop(
            BufReader::new(stdout),
            reader_pending,
            reader_notifications,
            fatal_tx,
        ));
        // Drained so the sender side never blocks; the connection learns of
        // child exit through pending-command resolution instead.
        tokio::spawn(async move {
            let mut rx = fatal_rx;
            while rx.recv().await.is_some() {}
        });

        Ok(Self {
            stdin: Mutex::new(stdin),
            pending,
            next_command_number: AtomicU64::new(0),
            notifications,
            command_timeout,
            _child: child,
            _reader_task: reader_task,
        })
    }

    /// Submit a single-line command and await its end/error block.
    ///
    /// Access is serialised: the next command is not written until the
    /// previous command's terminal marker has been consumed.
    pub async fn execute(&self, cmd: &str) -> Result<String, ErrorCode> {
        let mut stdin = self.stdin.lock().await;
        let command_number = self.next_command_number.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().await;
            *pending = Some(PendingCommand {
                command_number,
                reply: tx,
            });
        }

        if let Err(e) = stdin.write_all(cmd.as_bytes()).await {
            warn!(error = %e, "control connection write failed");
            return Err(ErrorCode::MultiplexerFatal);
        }
        if let Err(e) = stdin.write_all(b"\n").await {
            warn!(error = %e, "control connection write failed");
            return Err(ErrorCode::MultiplexerFatal);
        }
        drop(stdin);

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ErrorCode::MultiplexerFatal),
            Err(_) => {
                // Discard the pending slot so a late marker for this
                // command number is ignored rather than misattributed.
                let mut pending = self.pending.lock().await;
                if matches!(pending.as_ref(), Some(p) if p.command_number == command_number) {
                    *pending = None;
                }
                Err(ErrorCode::MultiplexerTimeout)
            }
        }
    }

    /// Subscribe to the lossy notification broadcast (`%sessions-changed`,
    /// `%output`, `%session-changed`, `%exit`, …).
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<String> {
        self.notifications.subscribe()
    }
}

async fn read_loop(
    mut stdout: BufReader<tokio::process::ChildStdout>,
    pending: std::sync::Arc<Mutex<Option<PendingCommand>>>,
    notifications: broadcast::Sender<String>,
    fatal_tx: mpsc::Sender<()>,
) {
    let mut accumulator = BlockAccumulator::new();
    let mut line = String::new();

    loop {
        line.clear();
        let n = match stdout.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "control connection read failed");
                break;
            }
        };
        if n == 0 {
            debug!("control connection child closed stdout");
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);

        match accumulator.feed(trimmed) {
            Accept::Pending => {}
            Accept::Notification(text) => {
                let _ = notifications.send(text);
            }
            Accept::Unexpected { command_number } => {
                warn!(command_number, "control-mode marker did not match open block");
            }
            Accept::Done(result) => {
                let mut pending_guard = pending.lock().await;
                match pending_guard.take() {
                    Some(p) if p.command_number == result.command_number => {
                        let outcome = if result.success {
                            Ok(result.text)
                        } else {
                            warn!(text = %result.text, "multiplexer command failed");
                            Err(ErrorCode::MultiplexerCommandFailed)
                        };
                        let _ = p.reply.send(outcome);
                    }
                    other => {
                        *pending_guard = other;
                        warn!(
                            command_number = result.command_number,
                            "completed block had no matching pending command"
                        );
                    }
                }
            }
        }
    }

    // Child exited: fail whatever is outstanding and tell callers no more
    // notifications will arrive.
    if let Some(p) = pending.lock().await.take() {
        let _ = p.reply.send(Err(ErrorCode::MultiplexerFatal));
    }
    let _ = fatal_tx.send(()).await;
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
