use std::io::Write;
use std::time::Duration;

use super::*;

/// Writes a fake "tmux" shell script that speaks a minimal control-mode
/// dialect: echoes `%begin/%end` around anything it reads, except for lines
/// starting with `fail` (answered with `%error`) and `slow` (never
/// answered, to exercise the timeout path).
fn fake_tmux_script(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("fake-tmux");
    let script = r#"#!/bin/sh
n=-1
while IFS= read -r line; do
  n=$((n + 1))
  case "$line" in
    fail*)
      printf '%%begin 0 %s 1\n' "$n"
      printf '%%error 0 %s 1\n' "$n"
      ;;
    slow*)
      : # never respond
      ;;
    *)
      printf '%%begin 0 %s 1\n' "$n"
      printf 'ok:%s\n' "$line"
      printf '%%end 0 %s 1\n' "$n"
      ;;
  esac
done
"#;
    let mut f = std::fs::File::create(&path).expect("write fake tmux script");
    f.write_all(script.as_bytes()).expect("write script body");
    drop(f);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod script");
    }
    path
}

#[tokio::test]
async fn executes_command_and_returns_payload_text() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = fake_tmux_script(dir.path());
    let conn = ControlConnection::spawn(
        script.to_str().expect("utf8 path"),
        None,
        "monitor",
        Duration::from_secs(2),
    )
    .await
    .expect("spawn fake control connection");

    let out = conn.execute("list-sessions").await.expect("execute succeeds");
    assert_eq!(out, "ok:list-sessions");
}

#[tokio::test]
async fn error_block_surfaces_as_command_failed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = fake_tmux_script(dir.path());
    let conn = ControlConnection::spawn(
        script.to_str().expect("utf8 path"),
        None,
        "monitor",
        Duration::from_secs(2),
    )
    .await
    .expect("spawn fake control connection");

    let err = conn.execute("fail-this").await.expect_err("should fail");
    assert_eq!(err, ErrorCode::MultiplexerCommandFailed);
}

#[tokio::test]
async fn missing_end_marker_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = fake_tmux_script(dir.path());
    let conn = ControlConnection::spawn(
        script.to_str().expect("utf8 path"),
        None,
        "monitor",
        Duration::from_millis(200),
    )
    .await
    .expect("spawn fake control connection");

    let err = conn.execute("slow-this").await.expect_err("should time out");
    assert_eq!(err, ErrorCode::MultiplexerTimeout);
}

#[tokio::test]
async fn commands_are_serialised_and_each_gets_its_own_reply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = fake_tmux_script(dir.path());
    let conn = std::sync::Arc::new(
        ControlConnection::spawn(
            script.to_str().expect("utf8 path"),
            None,
            "monitor",
            Duration::from_secs(2),
        )
        .await
        .expect("spawn fake control connection"),
    );

    let a = conn.clone();
    let b = conn.clone();
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.execute("cmd-a").await }),
        tokio::spawn(async move { b.execute("cmd-b").await }),
    );
    assert_eq!(ra.expect("join a").expect("cmd-a ok"), "ok:cmd-a");
    assert_eq!(rb.expect("join b").expect("cmd-b ok"), "ok:cmd-b");
}
