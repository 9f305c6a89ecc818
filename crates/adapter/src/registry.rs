// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::kill as nix_kill;
use nix::unistd::Pid;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command;
use crate::control::ControlConnection;
use crate::detect::{self, Candidate, Environment};
use crate::model::Agent;

/// A single change between two consecutive scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(Agent),
    Removed(String),
    Updated(Agent),
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tracks the set of live agents by periodically and reactively rescanning
/// tmux sessions. Readers never block on a scan; the known set is replaced
/// atomically once a scan completes.
pub struct AgentRegistry {
    known: Arc<RwLock<HashMap<String, Agent>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl AgentRegistry {
    /// Run one synchronous scan to prime the known set, then return a
    /// registry whose background task is not yet started. Call
    /// [`AgentRegistry::run`] to begin reactive rescanning.
    pub async fn prime(conn: &ControlConnection, town_dir: &std::path::Path) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let known = Arc::new(RwLock::new(HashMap::new()));

        let scanned = scan(conn, town_dir, &ProcEnvironment).await;
        {
            let mut guard = known.write().await;
            for agent in scanned {
                guard.insert(agent.name.clone(), agent);
            }
        }

        Self { known, events }
    }

    /// Spawn the background task that rescans on a `%sessions-changed` /
    /// `%session-changed` notification, a coalesced tick, or cancellation.
    pub fn run(
        &self,
        conn: Arc<ControlConnection>,
        town_dir: PathBuf,
        rescan_interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let known = self.known.clone();
        let events = self.events.clone();
        let mut notifications = conn.subscribe_notifications();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rescan_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("agent registry scan task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {}
                    notif = notifications.recv() => {
                        match notif {
                            Ok(text) if is_session_change(&text) => {}
                            Ok(_) => continue,
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => {
                                warn!("control connection notifications closed; registry scan task exiting");
                                break;
                            }
                        }
                    }
                }

                let scanned = scan(&conn, &town_dir, &ProcEnvironment).await;
                apply_scan(&known, &events, scanned).await;
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub async fn get_agents(&self) -> Vec<Agent> {
        let guard = self.known.read().await;
        let mut agents: Vec<Agent> = guard.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub async fn get_agent(&self, name: &str) -> Option<Agent> {
        self.known.read().await.get(name).cloned()
    }
}

fn is_session_change(notification: &str) -> bool {
    notification.starts_with("%sessions-changed") || notification.starts_with("%session-changed")
}

async fn scan(conn: &ControlConnection, town_dir: &std::path::Path, env: &dyn Environment) -> Vec<Agent> {
    let sessions = match command::list_sessions(conn).await {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!(error = %e, "registry scan failed to list sessions");
            return Vec::new();
        }
    };

    let mut agents = Vec::new();
    for session in sessions {
        let panes = match command::list_panes(conn, &session.name).await {
            Ok(panes) => panes,
            Err(e) => {
                warn!(session = %session.name, error = %e, "registry scan failed to list panes");
                continue;
            }
        };
        let Some(pane) = panes.into_iter().next() else {
            continue;
        };
        let environment = command::show_environment(conn, &session.name).await.unwrap_or_default();

        let candidate = Candidate {
            session_name: session.name.clone(),
            attached: session.attached,
            current_command: pane.current_command,
            pid: pane.pid,
            work_dir: pane.work_dir,
            gt_agent: environment.get("GT_AGENT").cloned(),
            gt_role: environment.get("GT_ROLE").cloned(),
            gt_rig: environment.get("GT_RIG").cloned(),
        };

        if let Ok(agent) = detect::classify(&candidate, town_dir, env) {
            agents.push(agent);
        }
    }
    agents
}

/// Replace the known set with `scanned`, emitting removed/added/updated
/// events in that order.
async fn apply_scan(
    known: &Arc<RwLock<HashMap<String, Agent>>>,
    events: &broadcast::Sender<RegistryEvent>,
    scanned: Vec<Agent>,
) {
    let new_set: HashMap<String, Agent> = scanned.into_iter().map(|a| (a.name.clone(), a)).collect();

    let mut guard = known.write().await;

    let removed: Vec<String> = guard.keys().filter(|k| !new_set.contains_key(*k)).cloned().collect();
    let added: Vec<Agent> = new_set
        .values()
        .filter(|a| !guard.contains_key(&a.name))
        .cloned()
        .collect();
    let updated: Vec<Agent> = new_set
        .values()
        .filter_map(|a| {
            let prior = guard.get(&a.name)?;
            (prior.attached != a.attached).then(|| a.clone())
        })
        .collect();

    *guard = new_set;
    drop(guard);

    for name in removed {
        let _ = events.send(RegistryEvent::Removed(name));
    }
    for agent in added {
        let _ = events.send(RegistryEvent::Added(agent));
    }
    for agent in updated {
        let _ = events.send(RegistryEvent::Updated(agent));
    }
}

/// Process-tree lookups backed by `/proc`, used as the registry's default
/// [`Environment`] in production.
struct ProcEnvironment;

impl Environment for ProcEnvironment {
    fn child_processes(&self, pid: i32) -> Vec<(i32, String)> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        let mut children = Vec::new();
        for entry in entries.flatten() {
            let Ok(candidate_pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
                continue;
            };
            let stat_path = entry.path().join("stat");
            let Ok(stat) = std::fs::read_to_string(&stat_path) else {
                continue;
            };
            if let Some(fields) = parse_proc_stat(&stat) {
                if fields.ppid == pid {
                    children.push((candidate_pid, fields.comm));
                }
            }
        }
        children
    }

    fn is_alive(&self, pid: i32) -> bool {
        if nix_kill(Pid::from_raw(pid), None).is_err() {
            return false;
        }
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            // Process vanished between the signal-0 probe and this read;
            // treat as not alive rather than racing a stale answer.
            return false;
        };
        parse_proc_stat(&stat).is_some_and(|fields| fields.state != 'Z')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcStat {
    comm: String,
    state: char,
    ppid: i32,
}

/// Parse `/proc/<pid>/stat`'s `(comm) state ppid` fields. The comm field is
/// parenthesised and may itself contain spaces/parens, so it's located by
/// its outermost parens rather than naive whitespace splitting.
fn parse_proc_stat(stat: &str) -> Option<ProcStat> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    if close <= open {
        return None;
    }
    let comm = stat[open + 1..close].to_owned();
    let mut rest = stat[close + 1..].trim_start().split_whitespace();
    let state = rest.next()?.chars().next()?;
    let ppid: i32 = rest.next()?.parse().ok()?;
    Some(ProcStat { comm, state, ppid })
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
