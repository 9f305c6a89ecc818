use super::*;

#[test]
fn sanitise_strips_path_separators() {
    assert_eq!(sanitise_file_name("../../etc/passwd"), "passwd");
    assert_eq!(sanitise_file_name("dir/sub/name.txt"), "name.txt");
}

#[test]
fn sanitise_replaces_unsafe_characters() {
    assert_eq!(sanitise_file_name("weird name!.txt"), "weird_name_.txt");
}

#[test]
fn sanitise_falls_back_when_nothing_survives() {
    assert_eq!(sanitise_file_name("???"), "upload");
}

#[test]
fn text_under_cap_is_inlined() {
    let path = PathBuf::from("/tmp/whatever");
    let payload = build_paste_payload("text/plain", b"hello world", &path);
    assert_eq!(payload, "hello world");
}

#[test]
fn json_mime_is_inlined() {
    let path = PathBuf::from("/tmp/whatever");
    let payload = build_paste_payload("application/json", b"{\"a\":1}", &path);
    assert_eq!(payload, "{\"a\":1}");
}

#[test]
fn text_over_inline_cap_falls_back_to_path() {
    let path = PathBuf::from("/tmp/big.txt");
    let big = vec![b'a'; INLINE_SIZE_CAP + 1];
    let payload = build_paste_payload("text/plain", &big, &path);
    assert_eq!(payload, path.to_string_lossy());
}

#[test]
fn text_at_inline_cap_boundary_is_inlined() {
    let path = PathBuf::from("/tmp/big.txt");
    let exact = vec![b'a'; INLINE_SIZE_CAP];
    let payload = build_paste_payload("text/plain", &exact, &path);
    assert_eq!(payload.len(), INLINE_SIZE_CAP);
}

#[test]
fn non_utf8_text_falls_back_to_path() {
    let path = PathBuf::from("/tmp/binary.bin");
    let invalid = vec![0xff, 0xfe, 0x00];
    let payload = build_paste_payload("text/plain", &invalid, &path);
    assert_eq!(payload, path.to_string_lossy());
}

#[test]
fn control_bytes_outside_allowlist_fall_back_to_path() {
    let path = PathBuf::from("/tmp/control.bin");
    let with_bell = b"hello\x07world".to_vec();
    let payload = build_paste_payload("text/plain", &with_bell, &path);
    assert_eq!(payload, path.to_string_lossy());
}

#[test]
fn image_mime_always_pastes_path() {
    let path = PathBuf::from("/tmp/photo.png");
    let payload = build_paste_payload("image/png", b"tiny but valid utf8", &path);
    assert_eq!(payload, path.to_string_lossy());
}

#[test]
fn binary_mime_falls_back_to_path() {
    let path = PathBuf::from("/tmp/archive.zip");
    let payload = build_paste_payload("application/zip", b"PK\x03\x04", &path);
    assert_eq!(payload, path.to_string_lossy());
}

#[tokio::test]
async fn save_upload_writes_under_the_agent_work_dir() {
    let tmpdir = tempfile::tempdir().expect("tempdir");
    let agent = Agent {
        name: "hq-mayor".into(),
        role: crate::model::Role::Mayor,
        runtime: crate::model::Runtime::Claude,
        rig: None,
        work_dir: tmpdir.path().to_path_buf(),
        attached: true,
    };

    let saved = save_upload(&agent, "notes.txt", b"content").await.expect("save");
    assert!(saved.starts_with(tmpdir.path().join(".tmux-adapter").join("uploads")));
    let contents = tokio::fs::read(&saved).await.expect("read back");
    assert_eq!(contents, b"content");
}

#[test]
fn upload_size_cap_is_eight_mebibytes() {
    assert_eq!(MAX_UPLOAD_BYTES, 8 * 1024 * 1024);
}
