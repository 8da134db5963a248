use std::fs;
use team_ops::core::config::TeamOpsConfig;
use team_ops::core::error::TeamOpsError;
use team_ops::core::monitor::read_events;
use team_ops::core::store::{Store, TeamId};
use team_ops::plugins::messages::MESSAGES_LOG;
use team_ops::plugins::tasks::{NewTask, add_task, list_tasks};
use team_ops::plugins::team::{TEAM_FILE, init_team, load_team};
use tempfile::tempdir;

fn store_at(root: &std::path::Path) -> Store {
    let mut config = TeamOpsConfig::default();
    config.monitor.enabled = true;
    Store::with_config(root.join(".team-ops"), config)
}

fn members(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|m| m.to_string()).collect()
}

#[test]
fn init_writes_every_state_file() {
    let tmp = tempdir().unwrap();
    let store = store_at(tmp.path());
    let team = TeamId::parse("alpha").unwrap();

    let outcome = init_team(&store, &team, "ship v1", &members(&["ann", "bo", "ann"]), false).unwrap();
    assert!(!outcome.reset);
    assert_eq!(outcome.team.members, vec!["ann", "bo"]);

    let dir = store.team_dir(&team);
    for file in [TEAM_FILE, "tasks.json", "debates.json", MESSAGES_LOG] {
        assert!(dir.join(file).exists(), "{file} missing");
    }
    assert_eq!(load_team(&store, &team).unwrap(), outcome.team);

    let events = read_events(&store, &team).unwrap();
    assert_eq!(events.entries.len(), 1);
    assert_eq!(events.entries[0].event_type, "team.initialized");
}

#[test]
fn second_init_conflicts_until_forced() {
    let tmp = tempdir().unwrap();
    let store = store_at(tmp.path());
    let team = TeamId::parse("alpha").unwrap();
    init_team(&store, &team, "goal", &members(&["ann", "bo"]), false).unwrap();
    add_task(&store, &team, NewTask::titled("keep me?"), "ann").unwrap();

    let err = init_team(&store, &team, "goal", &members(&["ann"]), false).unwrap_err();
    assert!(matches!(err, TeamOpsError::Conflict(_)));
    assert_eq!(list_tasks(&store, &team, None).unwrap().len(), 1);

    let outcome = init_team(&store, &team, "new goal", &members(&["cy", "dee"]), true).unwrap();
    assert!(outcome.reset);
    assert!(list_tasks(&store, &team, None).unwrap().is_empty());
    assert_eq!(load_team(&store, &team).unwrap().goal, "new goal");
}

#[test]
fn corrupt_team_record_needs_force_and_partial_init_is_rebuilt() {
    let tmp = tempdir().unwrap();
    let store = store_at(tmp.path());
    let team = TeamId::parse("alpha").unwrap();
    let dir = store.team_dir(&team);

    // Partial: boards exist but the team record was never written.
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("tasks.json"), "{broken").unwrap();
    let outcome = init_team(&store, &team, "goal", &members(&["ann"]), false).unwrap();
    assert!(outcome.reset);
    assert!(list_tasks(&store, &team, None).unwrap().is_empty());

    fs::write(dir.join(TEAM_FILE), r#"{"team_name": "alpha"}"#).unwrap();
    let err = init_team(&store, &team, "goal", &members(&["ann"]), false).unwrap_err();
    assert!(matches!(err, TeamOpsError::CorruptState { .. }));
    assert!(matches!(load_team(&store, &team), Err(TeamOpsError::CorruptState { .. })));

    init_team(&store, &team, "goal", &members(&["ann"]), true).unwrap();
    assert!(load_team(&store, &team).is_ok());
}

#[test]
fn init_rejects_bad_members_and_uninitialized_teams_are_reported() {
    let tmp = tempdir().unwrap();
    let store = store_at(tmp.path());
    let team = TeamId::parse("alpha").unwrap();

    for bad in [vec![], members(&["a b"]), members(&["unassigned"]), members(&["*"])] {
        let err = init_team(&store, &team, "goal", &bad, false).unwrap_err();
        assert!(matches!(err, TeamOpsError::InvalidInput(_)), "{bad:?}");
    }
    assert!(matches!(
        init_team(&store, &team, "  ", &members(&["ann"]), false),
        Err(TeamOpsError::InvalidInput(_))
    ));

    let err = load_team(&store, &team).unwrap_err();
    assert!(err.to_string().contains("not initialized"), "{err}");
}
