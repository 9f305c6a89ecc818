// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin, stateless wrappers over [`ControlConnection::execute`] that quote
//! their arguments for the control-mode grammar and parse tab-delimited
//! output. Callers own retries and choreography; this module issues one
//! command and interprets one reply.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::warn;

use crate::control::ControlConnection;
use crate::error::ErrorCode;
use crate::model::{PaneInfo, SessionInfo};

const HEX_CHUNK_SIZE: usize = 128;

/// Quote a string as a single control-mode argument.
///
/// The control-mode grammar tokenises like a POSIX shell command line, so a
/// single-quoted literal with embedded quotes closed/reopened is sufficient
/// and never needs backslash escapes.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

pub async fn list_sessions(conn: &ControlConnection) -> Result<Vec<SessionInfo>, ErrorCode> {
    let out = conn
        .execute("list-sessions -F '#{session_name}\t#{session_attached}'")
        .await?;
    Ok(out
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(2, '\t');
            let name = parts.next()?.to_owned();
            let attached = parts.next()?.trim() != "0";
            Some(SessionInfo { name, attached })
        })
        .collect())
}

pub async fn list_panes(conn: &ControlConnection, session: &str) -> Result<Vec<PaneInfo>, ErrorCode> {
    let cmd = format!(
        "list-panes -t {} -F '#{{pane_id}}\t#{{pane_current_command}}\t#{{pane_pid}}\t#{{pane_current_path}}'",
        quote(session)
    );
    let out = conn.execute(&cmd).await?;
    Ok(out
        .lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(4, '\t');
            let pane_id = parts.next()?.to_owned();
            let current_command = parts.next()?.to_owned();
            let pid: i32 = parts.next()?.trim().parse().ok()?;
            let work_dir = PathBuf::from(parts.next()?);
            Some(PaneInfo {
                pane_id,
                current_command,
                pid,
                work_dir,
            })
        })
        .collect())
}

/// `show-environment -t <session>`, parsed into a map. Unset variables are
/// reported by tmux with a leading `-` and are omitted here.
pub async fn show_environment(
    conn: &ControlConnection,
    session: &str,
) -> Result<HashMap<String, String>, ErrorCode> {
    let cmd = format!("show-environment -t {}", quote(session));
    let out = conn.execute(&cmd).await?;
    Ok(out
        .lines()
        .filter(|l| !l.starts_with('-'))
        .filter_map(|line| {
            let (k, v) = line.split_once('=')?;
            Some((k.to_owned(), v.to_owned()))
        })
        .collect())
}

pub async fn send_keys_literal(
    conn: &ControlConnection,
    target: &str,
    text: &str,
) -> Result<(), ErrorCode> {
    let cmd = format!("send-keys -t {} -l -- {}", quote(target), quote(text));
    conn.execute(&cmd).await.map(|_| ())
}

pub async fn send_keys_named(
    conn: &ControlConnection,
    target: &str,
    key_name: &str,
) -> Result<(), ErrorCode> {
    let cmd = format!("send-keys -t {} {}", quote(target), key_name);
    conn.execute(&cmd).await.map(|_| ())
}

/// Send raw bytes to a pane. Prefers hex-octet mode (`-H`), chunked to at
/// most [`HEX_CHUNK_SIZE`] bytes per command; falls back to literal mode if
/// the running multiplexer does not support `-H`.
pub async fn send_keys_bytes(
    conn: &ControlConnection,
    target: &str,
    bytes: &[u8],
) -> Result<(), ErrorCode> {
    for chunk in bytes.chunks(HEX_CHUNK_SIZE) {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let cmd = format!("send-keys -t {} -H {}", quote(target), hex.join(" "));
        match conn.execute(&cmd).await {
            Ok(_) => continue,
            Err(ErrorCode::MultiplexerCommandFailed) => {
                warn!("send-keys -H unsupported, falling back to literal mode");
                let text = String::from_utf8_lossy(chunk).into_owned();
                send_keys_literal(conn, target, &text).await?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Capture a pane's entire scrollback with escape sequences preserved.
pub async fn capture_pane_all(conn: &ControlConnection, target: &str) -> Result<String, ErrorCode> {
    let cmd = format!("capture-pane -t {} -p -e -S -", quote(target));
    conn.execute(&cmd).await
}

pub async fn resize_window(
    conn: &ControlConnection,
    target: &str,
    cols: u32,
    rows: u32,
) -> Result<(), ErrorCode> {
    let cmd = format!("resize-window -t {} -x {cols} -y {rows}", quote(target));
    conn.execute(&cmd).await.map(|_| ())
}

pub async fn pipe_pane_start(
    conn: &ControlConnection,
    session: &str,
    spool: &Path,
) -> Result<(), ErrorCode> {
    let spool_str = spool.to_string_lossy();
    let shell_cmd = format!("cat >> {}", quote(&spool_str));
    let cmd = format!("pipe-pane -o -t {} {}", quote(session), quote(&shell_cmd));
    conn.execute(&cmd).await.map(|_| ())
}

pub async fn pipe_pane_stop(conn: &ControlConnection, session: &str) -> Result<(), ErrorCode> {
    let cmd = format!("pipe-pane -t {}", quote(session));
    conn.execute(&cmd).await.map(|_| ())
}

pub async fn kill_session(conn: &ControlConnection, session: &str) -> Result<(), ErrorCode> {
    let cmd = format!("kill-session -t {}", quote(session));
    conn.execute(&cmd).await.map(|_| ())
}

pub async fn display_message(
    conn: &ControlConnection,
    target: &str,
    format: &str,
) -> Result<String, ErrorCode> {
    let cmd = format!("display-message -t {} -p {}", quote(target), quote(format));
    conn.execute(&cmd).await
}

/// Materialise `bytes` to a temp file, load it into the multiplexer's paste
/// buffer, paste into `target`, then drop the buffer and unlink the file.
pub async fn paste_bytes(
    conn: &ControlConnection,
    target: &str,
    buffer_name: &str,
    bytes: &[u8],
) -> Result<(), ErrorCode> {
    let tmp = tempfile::NamedTempFile::new().map_err(|_| ErrorCode::PasteFailed)?;
    tokio::fs::write(tmp.path(), bytes)
        .await
        .map_err(|_| ErrorCode::PasteFailed)?;

    let path = tmp.path().to_string_lossy();
    let load_cmd = format!("load-buffer -w -b {} {}", quote(buffer_name), quote(&path));
    if conn.execute(&load_cmd).await.is_err() {
        let plain_cmd = format!("load-buffer -b {} {}", quote(buffer_name), quote(&path));
        conn.execute(&plain_cmd).await?;
    }

    let paste_cmd = format!("paste-buffer -d -b {} -t {}", quote(buffer_name), quote(target));
    conn.execute(&paste_cmd).await.map(|_| ())
}

/// Force a redraw of an attached session by shrinking and restoring the
/// window. Falls back to `SIGWINCH` against the pane's process group, then
/// its pid directly, when the resize trick itself fails.
pub async fn force_redraw(
    conn: &ControlConnection,
    session: &str,
    pane_pid: Option<i32>,
) -> Result<(), ErrorCode> {
    let size = display_message(conn, session, "#{window_width}x#{window_height}").await;

    if let Ok(size) = size {
        if let Some((cols, rows)) = parse_size(&size) {
            if rows > 1 {
                let shrunk = resize_window(conn, session, cols, rows - 1).await;
                if shrunk.is_ok() {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    let restored = resize_window(conn, session, cols, rows).await;
                    if restored.is_ok() {
                        return Ok(());
                    }
                }
            }
        }
    }

    let Some(pid) = pane_pid else {
        return Err(ErrorCode::SendFailed);
    };
    if signal::kill(Pid::from_raw(-pid), Signal::SIGWINCH).is_ok() {
        return Ok(());
    }
    if signal::kill(Pid::from_raw(pid), Signal::SIGWINCH).is_ok() {
        return Ok(());
    }
    Err(ErrorCode::SendFailed)
}

fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.trim().split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
