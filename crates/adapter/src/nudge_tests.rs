use std::io::Write;

use super::*;
use crate::model::{Role, Runtime};

/// A fake "tmux" that answers every command with success, except commands
/// containing `FAIL_ENTER_COUNT` times it is told to fail `send-keys ...
/// Enter`, so retry behaviour is exercised deterministically.
fn fake_tmux_script(dir: &std::path::Path, fail_enter_times: u32) -> std::path::PathBuf {
    let path = dir.join("fake-tmux");
    let script = format!(
        r#"#!/bin/sh
n=-1
enter_failures=0
max_enter_failures={fail_enter_times}
while IFS= read -r line; do
  n=$((n + 1))
  case "$line" in
    *" Enter"*)
      if [ "$enter_failures" -lt "$max_enter_failures" ]; then
        enter_failures=$((enter_failures + 1))
        printf '%%begin 0 %s 1\n' "$n"
        printf '%%error 0 %s 1\n' "$n"
        continue
      fi
      printf '%%begin 0 %s 1\n' "$n"
      printf '%%end 0 %s 1\n' "$n"
      ;;
    *)
      printf '%%begin 0 %s 1\n' "$n"
      printf '80x24\n'
      printf '%%end 0 %s 1\n' "$n"
      ;;
  esac
done
"#
    );
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

fn agent(name: &str, attached: bool) -> Agent {
    Agent {
        name: name.to_owned(),
        role: Role::Crew,
        runtime: Runtime::Claude,
        rig: None,
        work_dir: std::path::PathBuf::from("/home/town/gt").join(name),
        attached,
    }
}

async fn connection(dir: &std::path::Path, fail_enter_times: u32) -> Arc<ControlConnection> {
    let script = fake_tmux_script(dir, fail_enter_times);
    Arc::new(
        ControlConnection::spawn(
            script.to_str().expect("utf8 path"),
            None,
            "monitor",
            Duration::from_secs(2),
        )
        .await
        .expect("spawn fake control connection"),
    )
}

#[tokio::test]
async fn nudge_succeeds_when_every_command_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = connection(dir.path(), 0).await;
    let driver = SessionPromptDriver::new(conn);

    let result = driver.nudge(&agent("hq-mayor", true), "hello").await;
    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn nudge_retries_enter_and_eventually_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = connection(dir.path(), 2).await;
    let driver = SessionPromptDriver::new(conn);

    let result = driver.nudge(&agent("hq-mayor", true), "hello").await;
    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn nudge_fails_after_exhausting_enter_retries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = connection(dir.path(), 10).await;
    let driver = SessionPromptDriver::new(conn);

    let result = driver.nudge(&agent("hq-mayor", true), "hello").await;
    assert_eq!(result, Err(NudgeFailure::SendEnterFailedAfterRetries));
}

#[tokio::test]
async fn concurrent_nudges_on_the_same_agent_do_not_interleave() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = connection(dir.path(), 0).await;
    let driver = Arc::new(SessionPromptDriver::new(conn));

    let a = agent("hq-mayor", true);
    let d1 = driver.clone();
    let a1 = a.clone();
    let d2 = driver.clone();
    let a2 = a.clone();

    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { d1.nudge(&a1, "first").await }),
        tokio::spawn(async move { d2.nudge(&a2, "second").await }),
    );
    assert_eq!(r1.expect("join"), Ok(()));
    assert_eq!(r2.expect("join"), Ok(()));
}

#[test]
fn lock_for_returns_the_same_lock_for_the_same_agent_name() {
    // Driver locks must be reused per agent, never recreated per call, or
    // concurrent nudges to the same agent could both acquire "a" lock and
    // interleave.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    rt.block_on(async {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = connection(dir.path(), 0).await;
        let driver = SessionPromptDriver::new(conn);
        let a = driver.lock_for("hq-mayor").await;
        let b = driver.lock_for("hq-mayor").await;
        assert!(Arc::ptr_eq(&a, &b));
    });
}
