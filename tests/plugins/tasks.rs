use std::sync::{Arc, Barrier};
use std::thread;
use team_ops::core::config::TeamOpsConfig;
use team_ops::core::error::TeamOpsError;
use team_ops::core::monitor::read_events;
use team_ops::core::store::{Store, TeamId};
use team_ops::plugins::tasks::{
    NewTask, TaskStatus, TaskUpdate, add_task, claim_task, get_task, list_tasks, update_task,
};
use team_ops::plugins::team::{UNASSIGNED, init_team};
use tempfile::{TempDir, tempdir};

fn setup(monitor: bool) -> (TempDir, Store, TeamId) {
    let tmp = tempdir().unwrap();
    let mut config = TeamOpsConfig::default();
    config.monitor.enabled = monitor;
    let store = Store::with_config(tmp.path().join(".team-ops"), config);
    let team = TeamId::parse("alpha").unwrap();
    let members = vec!["ann".to_string(), "bo".to_string(), "cy".to_string()];
    init_team(&store, &team, "ship", &members, false).unwrap();
    (tmp, store, team)
}

#[test]
fn task_lifecycle_add_claim_update() {
    let (_tmp, store, team) = setup(true);

    let mut new = NewTask::titled("  write docs ");
    new.depends_on = vec!["task-9".to_string(), " ".to_string()];
    let task = add_task(&store, &team, new, "ann").unwrap();
    assert_eq!(task.id, "task-1");
    assert_eq!(task.title, "write docs");
    assert_eq!(task.owner, UNASSIGNED);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.depends_on, vec!["task-9"]);

    let claimed = claim_task(&store, &team, "task-1", "bo").unwrap();
    assert_eq!(claimed.owner, "bo");
    assert_eq!(claimed.status, TaskStatus::InProgress);

    let update = TaskUpdate {
        status: Some(TaskStatus::Completed),
        note: Some("merged".to_string()),
        ..Default::default()
    };
    let done = update_task(&store, &team, "task-1", &update, "bo").unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.owner, "bo");
    assert_eq!(done.notes.len(), 1);
    assert_eq!(done.notes[0].text, "merged");

    assert_eq!(get_task(&store, &team, "task-1").unwrap(), Some(done));
    assert!(get_task(&store, &team, "task-2").unwrap().is_none());

    let err = claim_task(&store, &team, "task-1", "cy").unwrap_err();
    assert!(matches!(err, TeamOpsError::Conflict(_)));

    let events = read_events(&store, &team).unwrap().entries;
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        kinds,
        vec!["team.initialized", "task.added", "task.claimed", "task.updated"]
    );
    let updated = &events[3];
    assert_eq!(updated.before.as_ref().unwrap()["status"], "in_progress");
    assert_eq!(updated.after.as_ref().unwrap()["status"], "completed");
    assert_eq!(updated.after.as_ref().unwrap()["note_count"], 1);
}

#[test]
fn owners_must_be_members_or_unassigned() {
    let (_tmp, store, team) = setup(false);
    let mut new = NewTask::titled("x");
    new.owner = "mallory".to_string();
    assert!(matches!(
        add_task(&store, &team, new, "ann"),
        Err(TeamOpsError::InvalidInput(_))
    ));

    add_task(&store, &team, NewTask::titled("y"), "ann").unwrap();
    let update = TaskUpdate {
        owner: Some("mallory".to_string()),
        ..Default::default()
    };
    assert!(update_task(&store, &team, "task-1", &update, "ann").is_err());
    assert!(claim_task(&store, &team, "task-1", "mallory").is_err());
    assert!(claim_task(&store, &team, "task-404", "ann").is_err());

    // Rejected adds never consume an id.
    let next = add_task(&store, &team, NewTask::titled("z"), "ann").unwrap();
    assert_eq!(next.id, "task-2");
}

#[test]
fn list_filters_by_status() {
    let (_tmp, store, team) = setup(false);
    for title in ["a", "b", "c"] {
        add_task(&store, &team, NewTask::titled(title), "ann").unwrap();
    }
    claim_task(&store, &team, "task-2", "ann").unwrap();
    let in_progress = list_tasks(&store, &team, Some(TaskStatus::InProgress)).unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].id, "task-2");
    assert_eq!(list_tasks(&store, &team, None).unwrap().len(), 3);
}

#[test]
fn concurrent_adds_get_unique_increasing_ids() {
    let (_tmp, store, team) = setup(false);
    let workers = 6;
    let per_worker = 5;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let store = store.clone();
            let team = team.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_worker)
                    .map(|i| {
                        add_task(&store, &team, NewTask::titled(&format!("w{w}-{i}")), "ann")
                            .unwrap()
                            .id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .map(|id| id.trim_start_matches("task-").parse().unwrap())
        .collect();
    ids.sort_unstable();
    let expected: Vec<u64> = (1..=(workers * per_worker) as u64).collect();
    assert_eq!(ids, expected);
}

#[test]
fn concurrent_claims_on_one_task_leave_a_single_owner() {
    let (_tmp, store, team) = setup(false);
    add_task(&store, &team, NewTask::titled("contested"), "ann").unwrap();
    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = ["ann", "bo", "cy"]
        .into_iter()
        .map(|member| {
            let store = store.clone();
            let team = team.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                claim_task(&store, &team, "task-1", member).unwrap().owner
            })
        })
        .collect();
    let owners: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let task = get_task(&store, &team, "task-1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    // The final owner is whichever claim ran last in the serial order.
    assert!(owners.contains(&task.owner));
    assert_eq!(list_tasks(&store, &team, None).unwrap().len(), 1);
}
