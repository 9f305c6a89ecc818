use super::*;

fn base() -> Config {
    Config {
        gt_dir: Some(PathBuf::from("/home/town/gt")),
        port: 8080,
        auth_token: None,
        allowed_origins: "localhost:*".into(),
        log_level: "info".into(),
        log_format: "text".into(),
        command_timeout_ms: 5000,
        rescan_interval_ms: 2000,
        tmux_bin: "tmux".into(),
        tmux_socket: None,
    }
}

#[test]
fn validates_happy_path() {
    assert!(base().validate().is_ok());
}

#[test]
fn rejects_relative_gt_dir() {
    let mut cfg = base();
    cfg.gt_dir = Some(PathBuf::from("relative/gt"));
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_empty_allowed_origins() {
    let mut cfg = base();
    cfg.allowed_origins = " , ,".into();
    assert!(cfg.validate().is_err());
}

#[test]
fn splits_origin_patterns_on_comma() {
    let mut cfg = base();
    cfg.allowed_origins = "localhost:*, https://example.com , app://*".into();
    assert_eq!(
        cfg.allowed_origin_patterns(),
        vec!["localhost:*", "https://example.com", "app://*"]
    );
}

#[test]
fn converts_millis_to_durations() {
    let cfg = base();
    assert_eq!(cfg.command_timeout(), Duration::from_millis(5000));
    assert_eq!(cfg.rescan_interval(), Duration::from_millis(2000));
}
