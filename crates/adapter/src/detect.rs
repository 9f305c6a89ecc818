// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure classification of a tmux session into an [`Agent`] or a rejection.
//! All external lookups (environment, process tree, liveness) are injected
//! by the caller so this module has no I/O of its own.

use std::path::{Path, PathBuf};

use crate::model::{Agent, Role, Runtime};

const TOWN_PREFIXES: [&str; 2] = ["hq-", "gt-"];
const MAX_PROCESS_WALK_DEPTH: usize = 4;
const MAX_PROCESS_WALK_FANOUT: usize = 8;

/// Everything the detector needs about a candidate session, gathered by the
/// caller via the command façade.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub session_name: String,
    pub attached: bool,
    pub current_command: String,
    pub pid: i32,
    pub work_dir: PathBuf,
    pub gt_agent: Option<String>,
    pub gt_role: Option<String>,
    pub gt_rig: Option<String>,
}

/// Injected lookups, kept separate from `Candidate` so detection logic
/// stays a pure function of its inputs.
pub trait Environment: Send + Sync {
    /// Direct child processes of `pid` as `(pid, command name)` pairs. Used
    /// to find a runtime binary hiding behind a shell.
    fn child_processes(&self, pid: i32) -> Vec<(i32, String)>;
    /// Whether `pid` currently exists and is not a zombie.
    fn is_alive(&self, pid: i32) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    PrefixMismatch,
    NoRole,
    WorkDirOutsideTown,
    NoRuntime,
    NotAlive,
}

pub fn classify(
    candidate: &Candidate,
    town_dir: &Path,
    env: &dyn Environment,
) -> Result<Agent, Rejection> {
    if !TOWN_PREFIXES.iter().any(|p| candidate.session_name.starts_with(p)) {
        return Err(Rejection::PrefixMismatch);
    }

    let role = candidate
        .gt_role
        .as_deref()
        .filter(|s| !s.is_empty())
        .and_then(Role::from_env_value)
        .or_else(|| infer_role_from_name(&candidate.session_name))
        .ok_or(Rejection::NoRole)?;

    let rig = if candidate.session_name.starts_with("hq-") {
        None
    } else {
        candidate.gt_rig.clone().filter(|s| !s.is_empty())
    };

    let work_dir = candidate.work_dir.clone();
    if !is_under(&work_dir, town_dir) {
        return Err(Rejection::WorkDirOutsideTown);
    }

    let runtime = detect_runtime(&candidate.current_command, candidate.pid, env)
        .ok_or(Rejection::NoRuntime)?;

    if !env.is_alive(candidate.pid) {
        return Err(Rejection::NotAlive);
    }

    Ok(Agent {
        name: candidate.session_name.clone(),
        role,
        runtime,
        rig,
        work_dir,
        attached: candidate.attached,
    })
}

fn infer_role_from_name(name: &str) -> Option<Role> {
    name.split('-').find_map(Role::from_name_segment)
}

fn is_under(path: &Path, town_dir: &Path) -> bool {
    path.starts_with(town_dir)
}

fn detect_runtime(current_command: &str, pid: i32, env: &dyn Environment) -> Option<Runtime> {
    if let Some(runtime) = Runtime::from_command_name(current_command) {
        return Some(runtime);
    }
    if looks_like_bare_version(current_command) {
        return Some(Runtime::Claude);
    }
    if looks_like_shell(current_command) {
        return walk_for_runtime(pid, env, 0);
    }
    None
}

fn looks_like_shell(command: &str) -> bool {
    matches!(command, "bash" | "sh" | "zsh" | "fish" | "dash")
}

fn looks_like_bare_version(command: &str) -> bool {
    !command.is_empty()
        && command.chars().next().is_some_and(|c| c.is_ascii_digit())
        && command.contains('.')
        && command.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn walk_for_runtime(pid: i32, env: &dyn Environment, depth: usize) -> Option<Runtime> {
    if depth >= MAX_PROCESS_WALK_DEPTH {
        return None;
    }
    for (child_pid, name) in env.child_processes(pid).into_iter().take(MAX_PROCESS_WALK_FANOUT) {
        if let Some(runtime) = Runtime::from_command_name(&name) {
            return Some(runtime);
        }
        if looks_like_bare_version(&name) {
            return Some(Runtime::Claude);
        }
        if looks_like_shell(&name) {
            if let Some(runtime) = walk_for_runtime(child_pid, env, depth + 1) {
                return Some(runtime);
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "detect_tests.rs"]
mod tests;
