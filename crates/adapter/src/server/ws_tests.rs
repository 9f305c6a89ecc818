use super::*;

#[test]
fn ws_query_token_field_round_trips() {
    let present = WsQuery { token: Some("secret".to_owned()) };
    assert_eq!(present.token.as_deref(), Some("secret"));

    let absent = WsQuery { token: None };
    assert!(absent.token.is_none());
}
