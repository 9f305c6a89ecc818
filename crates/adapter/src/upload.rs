// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::process::Command;
use tracing::warn;

use crate::command;
use crate::control::ControlConnection;
use crate::error::ErrorCode;
use crate::model::Agent;

const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;
const INLINE_SIZE_CAP: usize = 256 * 1024;
const PASTE_BUFFER_NAME: &str = "tmux-adapter-upload";

const INLINE_MIME_PREFIXES: [&str; 1] = ["text/"];
const INLINE_MIME_EXACT: [&str; 4] = [
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/javascript",
];

/// Save the uploaded file under the agent's work directory, build a paste
/// payload for it (inline text or an absolute path), best-effort copy that
/// payload to the local clipboard, then paste it into the session.
pub async fn handle_upload(
    conn: &ControlConnection,
    agent: &Agent,
    file_name: &str,
    mime_type: &str,
    file_bytes: &[u8],
) -> Result<(), ErrorCode> {
    if file_bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ErrorCode::UploadTooLarge);
    }

    let saved_path = save_upload(agent, file_name, file_bytes).await?;
    let payload = build_paste_payload(mime_type, file_bytes, &saved_path);

    copy_to_clipboard_best_effort(payload.as_bytes()).await;

    command::paste_bytes(conn, &agent.name, PASTE_BUFFER_NAME, payload.as_bytes())
        .await
        .map_err(|_| ErrorCode::PasteFailed)
}

async fn save_upload(agent: &Agent, file_name: &str, file_bytes: &[u8]) -> Result<PathBuf, ErrorCode> {
    let sanitised = sanitise_file_name(file_name);
    let nanos = unix_nanos();

    let primary_dir = agent.work_dir.join(".tmux-adapter").join("uploads");
    if let Ok(()) = tokio::fs::create_dir_all(&primary_dir).await {
        let path = primary_dir.join(format!("{nanos}-{sanitised}"));
        if tokio::fs::write(&path, file_bytes).await.is_ok() {
            return Ok(path);
        }
    }

    let fallback_dir = std::env::temp_dir().join("tmux-adapter").join("uploads").join(&agent.name);
    tokio::fs::create_dir_all(&fallback_dir)
        .await
        .map_err(|_| ErrorCode::MultiplexerCommandFailed)?;
    let path = fallback_dir.join(format!("{nanos}-{sanitised}"));
    tokio::fs::write(&path, file_bytes)
        .await
        .map_err(|_| ErrorCode::MultiplexerCommandFailed)?;
    Ok(path)
}

fn sanitise_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "upload".to_owned()
    } else {
        cleaned
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// Inline file contents when the mime type looks textual, the payload is
/// small, and the bytes are valid UTF-8 without NUL or stray control bytes;
/// otherwise paste the absolute saved path. `image/*` always pastes a path.
fn build_paste_payload(mime_type: &str, file_bytes: &[u8], saved_path: &std::path::Path) -> String {
    if mime_type.starts_with("image/") {
        return saved_path.to_string_lossy().into_owned();
    }
    let is_inlineable_mime =
        INLINE_MIME_PREFIXES.iter().any(|p| mime_type.starts_with(p)) || INLINE_MIME_EXACT.contains(&mime_type);

    if is_inlineable_mime && file_bytes.len() <= INLINE_SIZE_CAP {
        if let Ok(text) = std::str::from_utf8(file_bytes) {
            if is_safe_inline_text(text) {
                return text.to_owned();
            }
        }
    }
    saved_path.to_string_lossy().into_owned()
}

fn is_safe_inline_text(text: &str) -> bool {
    text.chars().all(|c| !c.is_control() || matches!(c, '\t' | '\r' | '\n'))
}

const CLIPBOARD_TOOLS: [(&str, &[&str]); 4] = [
    ("pbcopy", &[]),
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard", "-in"]),
    ("xsel", &["--clipboard", "--input"]),
];

async fn copy_to_clipboard_best_effort(payload: &[u8]) {
    for (bin, args) in CLIPBOARD_TOOLS {
        if which(bin).await.is_none() {
            continue;
        }
        let Some(mut child) = Command::new(bin)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .ok()
        else {
            continue;
        };
        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            if stdin.write_all(payload).await.is_err() {
                warn!(tool = bin, "clipboard copy write failed");
            }
        }
        let _ = child.wait().await;
        return;
    }
}

async fn which(bin: &str) -> Option<PathBuf> {
    let Ok(path_var) = std::env::var("PATH") else {
        return None;
    };
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(bin);
        if tokio::fs::metadata(&candidate).await.is_ok() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
