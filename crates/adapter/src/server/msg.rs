// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket JSON message types and the binary frame envelope.
//!
//! Text frames carry `ClientMessage`/`ServerMessage`, internally tagged on
//! `type`. Binary frames carry `[type:1][agentName:UTF-8][0x00][payload]`.

use serde::{Deserialize, Serialize};

use crate::model::Agent;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    ListAgents {
        #[serde(default)]
        id: Option<String>,
    },
    SendPrompt {
        #[serde(default)]
        id: Option<String>,
        agent: String,
        prompt: String,
    },
    SubscribeOutput {
        #[serde(default)]
        id: Option<String>,
        agent: String,
        #[serde(default = "default_true")]
        stream: bool,
    },
    UnsubscribeOutput {
        #[serde(default)]
        id: Option<String>,
        agent: String,
    },
    SubscribeAgents {
        #[serde(default)]
        id: Option<String>,
    },
    UnsubscribeAgents {
        #[serde(default)]
        id: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    ListAgentsResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        agents: Vec<Agent>,
    },
    SendPromptResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SubscribeOutputResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        history: Option<String>,
    },
    UnsubscribeOutputResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        ok: bool,
    },
    SubscribeAgentsResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        ok: bool,
        agents: Vec<Agent>,
    },
    UnsubscribeAgentsResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        ok: bool,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: String,
    },
    AgentAdded {
        agent: Agent,
    },
    AgentRemoved {
        name: String,
    },
    AgentUpdated {
        agent: Agent,
    },
}

/// Binary frame type tags, `[type:1][agentName:UTF-8][0x00][payload]`.
pub mod binary_type {
    pub const OUTPUT: u8 = 0x01;
    pub const KEYBOARD: u8 = 0x02;
    pub const RESIZE: u8 = 0x03;
    pub const FILE_UPLOAD: u8 = 0x04;
    pub const SNAPSHOT_TRIGGER: u8 = 0x05;
}

pub const SNAPSHOT_TRIGGER_PAYLOAD: &[u8] = b"\x1b[2J\x1b[H";

/// A decoded `[type:1][agentName:UTF-8][0x00][payload]` binary frame.
pub struct BinaryFrame<'a> {
    pub frame_type: u8,
    pub agent: &'a str,
    pub payload: &'a [u8],
}

pub fn decode_binary_frame(bytes: &[u8]) -> Option<BinaryFrame<'_>> {
    let (&frame_type, rest) = bytes.split_first()?;
    let nul = rest.iter().position(|&b| b == 0)?;
    if nul == 0 {
        return None;
    }
    let agent = std::str::from_utf8(&rest[..nul]).ok()?;
    let payload = &rest[nul + 1..];
    Some(BinaryFrame {
        frame_type,
        agent,
        payload,
    })
}

pub fn encode_binary_frame(frame_type: u8, agent: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + agent.len() + 1 + payload.len());
    out.push(frame_type);
    out.extend_from_slice(agent.as_bytes());
    out.push(0);
    out.extend_from_slice(payload);
    out
}

/// Parse a `"cols:rows"` resize payload, rejecting `cols<2` or `rows<1`.
pub fn parse_resize_payload(payload: &[u8]) -> Option<(u32, u32)> {
    let text = std::str::from_utf8(payload).ok()?;
    let (cols, rows) = text.split_once(':')?;
    let cols: u32 = cols.trim().parse().ok()?;
    let rows: u32 = rows.trim().parse().ok()?;
    if cols < 2 || rows < 1 {
        return None;
    }
    Some((cols, rows))
}

/// A parsed `0x04` file-upload payload: `fileName \0 mimeType \0 fileBytes`.
pub struct FileUpload<'a> {
    pub file_name: &'a str,
    pub mime_type: &'a str,
    pub file_bytes: &'a [u8],
}

pub fn parse_file_upload_payload(payload: &[u8]) -> Option<FileUpload<'_>> {
    let first_nul = payload.iter().position(|&b| b == 0)?;
    let file_name = std::str::from_utf8(&payload[..first_nul]).ok()?;
    let rest = &payload[first_nul + 1..];
    let second_nul = rest.iter().position(|&b| b == 0)?;
    let mime_type = std::str::from_utf8(&rest[..second_nul]).ok()?;
    let file_bytes = &rest[second_nul + 1..];
    Some(FileUpload {
        file_name,
        mime_type,
        file_bytes,
    })
}

/// Maps a VT keyboard escape sequence to the tmux named key that should be
/// sent instead of the raw bytes. Sequences are matched by exact equality
/// against the full received payload, per the exhaustive table in the
/// external interface contract.
pub fn named_key_for_sequence(bytes: &[u8]) -> Option<&'static str> {
    Some(match bytes {
        b"\x1b[Z" => "BTab",
        b"\x1b[A" | b"\x1bOA" => "Up",
        b"\x1b[B" | b"\x1bOB" => "Down",
        b"\x1b[C" | b"\x1bOC" => "Right",
        b"\x1b[D" | b"\x1bOD" => "Left",
        b"\x1b[H" | b"\x1bOH" => "Home",
        b"\x1b[F" | b"\x1bOF" => "End",
        b"\x1b[5~" => "PgUp",
        b"\x1b[6~" => "PgDn",
        b"\x1b[2~" => "IC",
        b"\x1b[3~" => "DC",
        b"\x1bOP" => "F1",
        b"\x1bOQ" => "F2",
        b"\x1bOR" => "F3",
        b"\x1bOS" => "F4",
        b"\x1b[15~" => "F5",
        b"\x1b[17~" => "F6",
        b"\x1b[18~" => "F7",
        b"\x1b[19~" => "F8",
        b"\x1b[20~" => "F9",
        b"\x1b[21~" => "F10",
        b"\x1b[23~" => "F11",
        b"\x1b[24~" => "F12",
        b"\x1b" => "Escape",
        b"\x7f" => "BSpace",
        _ => return None,
    })
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
