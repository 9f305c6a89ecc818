use super::*;

#[test]
fn classifies_begin_end_error_and_notification() {
    assert_eq!(classify("%begin 1700000000 3 1"), Line::Begin { command_number: 3 });
    assert_eq!(classify("%end 1700000000 3 1"), Line::End { command_number: 3 });
    assert_eq!(classify("%error 1700000000 3 1"), Line::Error { command_number: 3 });
    assert_eq!(
        classify("%sessions-changed"),
        Line::Notification("%sessions-changed".into())
    );
}

#[test]
fn classifies_plain_text_as_payload() {
    assert_eq!(classify("hq-mayor: 1 windows"), Line::Payload("hq-mayor: 1 windows".into()));
}

#[test]
fn malformed_begin_falls_back_to_notification() {
    assert_eq!(classify("%begin garbage"), Line::Notification("%begin garbage".into()));
}

#[test]
fn accumulator_collects_payload_between_begin_and_end() {
    let mut acc = BlockAccumulator::new();
    assert!(matches!(acc.feed("%begin 1 7 1"), Accept::Pending));
    assert!(matches!(acc.feed("hq-mayor"), Accept::Pending));
    assert!(matches!(acc.feed("hq-deacon"), Accept::Pending));
    match acc.feed("%end 1 7 1") {
        Accept::Done(result) => {
            assert_eq!(result.command_number, 7);
            assert!(result.success);
            assert_eq!(result.text, "hq-mayor\nhq-deacon");
        }
        _ => panic!("expected Done"),
    }
}

#[test]
fn accumulator_reports_error_blocks_as_failed() {
    let mut acc = BlockAccumulator::new();
    acc.feed("%begin 1 1 1");
    acc.feed("unknown command: foo");
    match acc.feed("%error 1 1 1") {
        Accept::Done(result) => {
            assert!(!result.success);
            assert_eq!(result.text, "unknown command: foo");
        }
        _ => panic!("expected Done"),
    }
}

#[test]
fn accumulator_forwards_notifications_outside_blocks() {
    let mut acc = BlockAccumulator::new();
    match acc.feed("%exit") {
        Accept::Notification(text) => assert_eq!(text, "%exit"),
        _ => panic!("expected Notification"),
    }
}

#[test]
fn accumulator_flags_mismatched_end_as_unexpected() {
    let mut acc = BlockAccumulator::new();
    acc.feed("%begin 1 5 1");
    match acc.feed("%end 1 9 1") {
        Accept::Unexpected { command_number } => assert_eq!(command_number, 9),
        _ => panic!("expected Unexpected"),
    }
}

#[test]
fn at_most_one_open_block_invariant_holds_across_sequential_commands() {
    let mut acc = BlockAccumulator::new();
    acc.feed("%begin 1 1 1");
    acc.feed("%end 1 1 1");
    acc.feed("%begin 1 2 1");
    match acc.feed("%end 1 2 1") {
        Accept::Done(result) => assert_eq!(result.command_number, 2),
        _ => panic!("expected Done"),
    }
}
