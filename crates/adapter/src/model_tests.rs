use super::*;

#[test]
fn role_from_name_segment_recognises_crew() {
    assert_eq!(Role::from_name_segment("crew"), Some(Role::Crew));
    assert_eq!(Role::from_name_segment("bogus"), None);
}

#[test]
fn role_from_env_value_is_case_insensitive() {
    assert_eq!(Role::from_env_value("MAYOR"), Some(Role::Mayor));
}

#[test]
fn runtime_from_command_name_round_trips_binary_name() {
    for runtime in Runtime::ALL {
        assert_eq!(Runtime::from_command_name(runtime.binary_name()), Some(runtime));
    }
}

#[test]
fn runtime_from_command_name_rejects_unknown() {
    assert_eq!(Runtime::from_command_name("bash"), None);
}

#[test]
fn agent_serializes_rig_only_when_present() {
    let agent = Agent {
        name: "hq-mayor".into(),
        role: Role::Mayor,
        runtime: Runtime::Claude,
        rig: None,
        work_dir: PathBuf::from("/home/town/gt/hq-mayor"),
        attached: true,
    };
    let json = serde_json::to_value(&agent).unwrap_or_default();
    assert!(json.get("rig").is_none());
}
