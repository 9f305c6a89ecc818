use std::time::Duration;

use super::*;

#[test]
fn quote_wraps_plain_text() {
    assert_eq!(quote("hq-mayor"), "'hq-mayor'");
}

#[test]
fn quote_escapes_embedded_single_quotes() {
    assert_eq!(quote("it's"), "'it'\\''s'");
}

#[test]
fn parse_size_reads_width_and_height() {
    assert_eq!(parse_size("80x24"), Some((80, 24)));
    assert_eq!(parse_size(" 120x40 \n"), Some((120, 40)));
}

#[test]
fn parse_size_rejects_malformed_input() {
    assert_eq!(parse_size("nope"), None);
    assert_eq!(parse_size(""), None);
}

/// Spins up a real, isolated tmux server to exercise the façade against the
/// genuine control-mode grammar rather than a fake.
struct IsolatedTmux {
    socket: PathBuf,
    _tmpdir: tempfile::TempDir,
}

impl IsolatedTmux {
    async fn new(session: &str) -> Self {
        let tmpdir = tempfile::tempdir().expect("tempdir");
        let socket = tmpdir.path().join("tmux.sock");
        let status = tokio::process::Command::new("tmux")
            .arg("-S")
            .arg(&socket)
            .args(["new-session", "-d", "-s", session, "-x", "80", "-y", "24"])
            .status()
            .await
            .expect("spawn tmux new-session");
        assert!(status.success(), "tmux new-session failed");
        Self {
            socket,
            _tmpdir: tmpdir,
        }
    }

    async fn connect(&self) -> ControlConnection {
        ControlConnection::spawn("tmux", Some(&self.socket), "monitor", Duration::from_secs(5))
            .await
            .expect("spawn control connection")
    }
}

impl Drop for IsolatedTmux {
    fn drop(&mut self) {
        let _ = std::process::Command::new("tmux")
            .arg("-S")
            .arg(&self.socket)
            .args(["kill-server"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }
}

#[tokio::test]
async fn list_sessions_reports_the_session_we_created() {
    let tmux = IsolatedTmux::new("hq-mayor").await;
    let conn = tmux.connect().await;

    let sessions = list_sessions(&conn).await.expect("list-sessions");
    assert!(sessions.iter().any(|s| s.name == "hq-mayor"));
}

#[tokio::test]
async fn send_keys_literal_and_capture_pane_round_trip() {
    let tmux = IsolatedTmux::new("hq-deacon").await;
    let conn = tmux.connect().await;

    send_keys_literal(&conn, "hq-deacon", "echo hello-from-test")
        .await
        .expect("send-keys");
    send_keys_named(&conn, "hq-deacon", "Enter").await.expect("send Enter");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let captured = capture_pane_all(&conn, "hq-deacon").await.expect("capture-pane");
    assert!(captured.contains("hello-from-test"));
}

#[tokio::test]
async fn paste_bytes_delivers_content_into_the_pane() {
    let tmux = IsolatedTmux::new("hq-overseer").await;
    let conn = tmux.connect().await;

    paste_bytes(&conn, "hq-overseer", "tmux-adapter-test", b"pasted-content")
        .await
        .expect("paste-buffer");
    send_keys_named(&conn, "hq-overseer", "Enter").await.expect("send Enter");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let captured = capture_pane_all(&conn, "hq-overseer").await.expect("capture-pane");
    assert!(captured.contains("pasted-content"));
}
