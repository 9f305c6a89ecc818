// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level bootstrap — shared by `main` and integration tests.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::control::ControlConnection;
use crate::nudge::SessionPromptDriver;
use crate::pipepane::PipePaneManager;
use crate::registry::{AgentRegistry, RegistryEvent};
use crate::server::state::{LifecycleState, Store};

const MONITOR_SESSION: &str = "tmux-adapter-monitor";

/// Initialize tracing/logging from config. Uses `try_init` so it's safe to
/// call more than once (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = if std::env::var("RUST_LOG").is_err() {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Bootstrap the control connection, agent registry, and HTTP/WebSocket
/// server, then run until shutdown. Returns an error if the control
/// connection dies unexpectedly (the monitor tmux process exited) so the
/// process can exit non-zero rather than spinning with a dead backend.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    let town_dir = config.gt_dir_path()?;
    let shutdown = CancellationToken::new();

    let conn = Arc::new(
        ControlConnection::spawn(
            &config.tmux_bin,
            config.tmux_socket.as_deref(),
            MONITOR_SESSION,
            config.command_timeout(),
        )
        .await?,
    );

    let registry = Arc::new(AgentRegistry::prime(&conn, &town_dir).await);
    let registry_task = registry.run(conn.clone(), town_dir.clone(), config.rescan_interval(), shutdown.clone());

    let spool_dir = std::env::temp_dir().join("tmux-adapter").join("pipe-panes");
    let pipe_panes = Arc::new(PipePaneManager::new(conn.clone(), spool_dir));
    let prompts = Arc::new(SessionPromptDriver::new(conn.clone()));

    let reconciler_task =
        spawn_pipe_pane_reconciler(registry.clone(), pipe_panes.clone(), shutdown.clone());

    let port = config.port;
    let store = Arc::new(Store {
        conn: conn.clone(),
        registry,
        pipe_panes,
        prompts,
        config,
        town_dir,
        lifecycle: LifecycleState::new(shutdown.clone()),
    });

    let router = crate::server::build_router(store.clone());
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("listening on {}", listener.local_addr()?);

    let server_shutdown = shutdown.clone();
    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
    });

    spawn_signal_handler(shutdown.clone());

    tokio::select! {
        result = &mut server_task => {
            if let Ok(Err(e)) = result {
                error!("http server error: {e}");
            }
        }
        _ = wait_for_fatal_control_connection(&conn, &shutdown) => {
            error!("control connection lost; shutting down");
            shutdown.cancel();
            // Wait for the server's own graceful shutdown (triggered by the
            // cancel above) so in-flight connections finish their cleanup
            // before the multiplexer connection is torn down last.
            if let Ok(Err(e)) = server_task.await {
                error!("http server error during shutdown: {e}");
            }
        }
    }

    reconciler_task.abort();
    registry_task.abort();
    Ok(())
}

/// Subscribes to registry diff events and force-unsubscribes every
/// pipe-pane channel for an agent once it's reported removed, so a tmux
/// session dying doesn't leak spool files or subscriber channels.
fn spawn_pipe_pane_reconciler(
    registry: Arc<AgentRegistry>,
    pipe_panes: Arc<PipePaneManager>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => {
                    match event {
                        Ok(RegistryEvent::Removed(name)) => {
                            pipe_panes.force_unsubscribe_all(&name).await;
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    })
}

/// Resolves once the control connection's reader task has observed the
/// monitor tmux process exit, surfacing it as a fatal condition rather than
/// letting every subsequent command time out silently.
async fn wait_for_fatal_control_connection(conn: &ControlConnection, shutdown: &CancellationToken) {
    let mut notifications = conn.subscribe_notifications();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            event = notifications.recv() => {
                match event {
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        error!("control connection closed; shutting down");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGTERM"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGINT"),
        }
        shutdown.cancel();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGTERM again, forcing exit"),
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGINT again, forcing exit"),
        }
        std::process::exit(130);
    });
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
