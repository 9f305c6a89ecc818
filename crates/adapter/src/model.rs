// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The externally visible entity: a live AI coding agent running inside a
/// recognised tmux session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub role: Role,
    pub runtime: Runtime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rig: Option<String>,
    #[serde(rename = "workDir")]
    pub work_dir: PathBuf,
    pub attached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mayor,
    Deacon,
    Overseer,
    Witness,
    Refinery,
    Crew,
    Polecat,
    Boot,
}

impl Role {
    pub fn from_name_segment(segment: &str) -> Option<Role> {
        match segment {
            "mayor" => Some(Role::Mayor),
            "deacon" => Some(Role::Deacon),
            "overseer" => Some(Role::Overseer),
            "witness" => Some(Role::Witness),
            "refinery" => Some(Role::Refinery),
            "crew" => Some(Role::Crew),
            "polecat" => Some(Role::Polecat),
            "boot" => Some(Role::Boot),
            _ => None,
        }
    }

    pub fn from_env_value(value: &str) -> Option<Role> {
        Self::from_name_segment(&value.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Claude,
    Gemini,
    Codex,
    Cursor,
    Auggie,
    Amp,
    Opencode,
}

impl Runtime {
    pub const ALL: [Runtime; 7] = [
        Runtime::Claude,
        Runtime::Gemini,
        Runtime::Codex,
        Runtime::Cursor,
        Runtime::Auggie,
        Runtime::Amp,
        Runtime::Opencode,
    ];

    pub fn binary_name(self) -> &'static str {
        match self {
            Runtime::Claude => "claude",
            Runtime::Gemini => "gemini",
            Runtime::Codex => "codex",
            Runtime::Cursor => "cursor",
            Runtime::Auggie => "auggie",
            Runtime::Amp => "amp",
            Runtime::Opencode => "opencode",
        }
    }

    pub fn from_command_name(name: &str) -> Option<Runtime> {
        Self::ALL.into_iter().find(|r| r.binary_name() == name)
    }
}

/// A tmux session as enumerated by `list-sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub attached: bool,
}

/// The active pane of a session, as enumerated by `list-panes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub pane_id: String,
    pub current_command: String,
    pub pid: i32,
    pub work_dir: PathBuf,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
