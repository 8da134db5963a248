use std::fs::OpenOptions;
use std::io::Write;
use team_ops::core::config::TeamOpsConfig;
use team_ops::core::error::TeamOpsError;
use team_ops::core::store::{Store, TeamId};
use team_ops::plugins::messages::{MESSAGES_LOG, MessageKind, broadcast, inbox, send_message};
use team_ops::plugins::team::init_team;
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, Store, TeamId) {
    let tmp = tempdir().unwrap();
    let store = Store::with_config(tmp.path().join(".team-ops"), TeamOpsConfig::default());
    let team = TeamId::parse("alpha").unwrap();
    let members = vec!["ann".to_string(), "bo".to_string()];
    init_team(&store, &team, "ship", &members, false).unwrap();
    (tmp, store, team)
}

#[test]
fn inbox_holds_direct_messages_and_broadcasts_in_order() {
    let (_tmp, store, team) = setup();
    send_message(&store, &team, "ann", "bo", "ping").unwrap();
    send_message(&store, &team, "bo", "ann", "pong").unwrap();
    let sent = broadcast(&store, &team, "lead", "standup").unwrap();
    assert_eq!(sent.kind, MessageKind::Broadcast);
    assert_eq!(sent.to, "*");

    let bo = inbox(&store, &team, "bo").unwrap();
    let bodies: Vec<&str> = bo.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["ping", "standup"]);
    assert_eq!(bo.skipped, 0);

    let ann = inbox(&store, &team, "ann").unwrap();
    let bodies: Vec<&str> = ann.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["pong", "standup"]);
}

#[test]
fn malformed_log_lines_are_counted_not_fatal() {
    let (_tmp, store, team) = setup();
    send_message(&store, &team, "ann", "bo", "first").unwrap();
    let path = store.records(&team).log_path(MESSAGES_LOG);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "not json at all").unwrap();
    writeln!(file, r#"{{"at": "1Z", "type": "direct"}}"#).unwrap();
    drop(file);
    send_message(&store, &team, "ann", "bo", "second").unwrap();

    let bo = inbox(&store, &team, "bo").unwrap();
    assert_eq!(bo.messages.len(), 2);
    assert_eq!(bo.skipped, 2);
}

#[test]
fn recipients_must_be_members() {
    let (_tmp, store, team) = setup();
    assert!(matches!(
        send_message(&store, &team, "ann", "zed", "hi"),
        Err(TeamOpsError::InvalidInput(_))
    ));
    assert!(matches!(
        send_message(&store, &team, "a b", "bo", "hi"),
        Err(TeamOpsError::InvalidInput(_))
    ));
    assert!(matches!(
        send_message(&store, &team, "ann", "bo", "   "),
        Err(TeamOpsError::InvalidInput(_))
    ));
    assert!(inbox(&store, &team, "zed").is_err());
    assert!(inbox(&store, &team, "bo").unwrap().messages.is_empty());
}
