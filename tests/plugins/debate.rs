use std::collections::BTreeMap;
use std::fs;
use team_ops::core::config::TeamOpsConfig;
use team_ops::core::error::TeamOpsError;
use team_ops::core::monitor::read_events;
use team_ops::core::store::{Store, TeamId};
use team_ops::plugins::debate::{
    ApplyOutcome, ApplyRequest, DebateBoard, DebateStatus, DecideRequest, DecisionMethod, NewDebate,
    NewPosition, add_position, apply_decision, decide, get_debate, list_debates, start_debate,
};
use team_ops::plugins::messages::inbox;
use team_ops::plugins::tasks::{NewTask, TaskStatus, add_task, get_task};
use team_ops::plugins::team::init_team;
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, Store, TeamId) {
    let tmp = tempdir().unwrap();
    let mut config = TeamOpsConfig::default();
    config.monitor.enabled = true;
    let store = Store::with_config(tmp.path().join(".team-ops"), config);
    let team = TeamId::parse("alpha").unwrap();
    let members = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    init_team(&store, &team, "ship", &members, false).unwrap();
    (tmp, store, team)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn new_debate(task_id: Option<&str>) -> NewDebate {
    NewDebate {
        topic: "rollout speed".to_string(),
        task_id: task_id.map(str::to_string),
        options: strings(&["fast", "safe"]),
        members: strings(&["a", "b", "c"]),
        decider: Some("a".to_string()),
        created_by: "a".to_string(),
    }
}

fn position(member: &str, option: &str, confidence: f64) -> NewPosition {
    NewPosition {
        member: member.to_string(),
        option: option.to_string(),
        confidence,
        rationale: format!("{member} likes {option}"),
    }
}

#[test]
fn tie_broken_by_decider_then_applied_once() {
    let (_tmp, store, team) = setup();
    add_task(&store, &team, NewTask::titled("choose rollout"), "a").unwrap();
    let debate = start_debate(&store, &team, new_debate(Some("task-1"))).unwrap();
    assert_eq!(debate.id, "debate-1");
    assert_eq!(debate.status(), DebateStatus::Open);

    add_position(&store, &team, "debate-1", position("a", "fast", 0.6)).unwrap();
    add_position(&store, &team, "debate-1", position("b", "safe", 0.6)).unwrap();
    add_position(&store, &team, "debate-1", position("c", "fast", 0.0)).unwrap();

    let req = DecideRequest {
        actor: "a".to_string(),
        ..Default::default()
    };
    let outcome = decide(&store, &team, "debate-1", &req).unwrap();
    assert!(!outcome.existing);
    assert_eq!(outcome.decision.option, "fast");
    assert_eq!(outcome.decision.method, DecisionMethod::TieDecider);
    let expected: BTreeMap<String, f64> =
        [("fast".to_string(), 0.6), ("safe".to_string(), 0.6)].into_iter().collect();
    assert_eq!(outcome.decision.scores, expected);

    let again = decide(&store, &team, "debate-1", &req).unwrap();
    assert!(again.existing);
    assert_eq!(again.reported_method(), DecisionMethod::Existing);
    assert_eq!(again.decision, outcome.decision);

    let mut apply = ApplyRequest::by("a");
    apply.task_status = TaskStatus::InProgress;
    apply.owner_map.insert("fast".to_string(), "c".to_string());
    let applied = match apply_decision(&store, &team, "debate-1", &apply).unwrap() {
        ApplyOutcome::Applied(applied) => applied,
        other => panic!("expected applied, got {other:?}"),
    };
    assert_eq!(applied.task_owner, "c");
    assert_eq!(applied.task_status, TaskStatus::InProgress);

    let task = get_task(&store, &team, "task-1").unwrap().unwrap();
    assert_eq!(task.owner, "c");
    assert_eq!(task.notes.len(), 1);
    assert!(task.notes[0].text.contains("debate-1"));
    assert!(task.notes[0].text.contains("fast"));

    let second = apply_decision(&store, &team, "debate-1", &apply).unwrap();
    assert_eq!(second, ApplyOutcome::AlreadyApplied(applied));
    assert_eq!(get_task(&store, &team, "task-1").unwrap().unwrap(), task);

    let broadcasts = inbox(&store, &team, "b").unwrap().messages;
    assert_eq!(broadcasts.len(), 1, "apply broadcasts exactly once");

    let stored = get_debate(&store, &team, "debate-1").unwrap().unwrap();
    assert_eq!(stored.status(), DebateStatus::Applied);
    assert!(stored.applied().is_some());

    let kinds: Vec<String> = read_events(&store, &team)
        .unwrap()
        .entries
        .into_iter()
        .map(|e| e.event_type)
        .filter(|t| t.starts_with("debate."))
        .collect();
    assert_eq!(
        kinds,
        vec![
            "debate.started",
            "debate.position",
            "debate.position",
            "debate.position",
            "debate.decided",
            "debate.applied"
        ]
    );
}

#[test]
fn creation_is_validated() {
    let (_tmp, store, team) = setup();

    let mut one_option = new_debate(None);
    one_option.options = strings(&["fast", "fast", " "]);
    let mut outsider = new_debate(None);
    outsider.members = strings(&["a", "zed"]);
    let mut solo = new_debate(None);
    solo.members = strings(&["a", "a"]);
    let mut bad_decider = new_debate(None);
    bad_decider.decider = Some("c".to_string());
    bad_decider.members = strings(&["a", "b"]);
    let missing_task = new_debate(Some("task-5"));

    for new in [one_option, outsider, solo, bad_decider, missing_task] {
        let label = format!("{new:?}");
        assert!(
            matches!(start_debate(&store, &team, new), Err(TeamOpsError::InvalidInput(_))),
            "{label}"
        );
    }
    assert!(list_debates(&store, &team).unwrap().is_empty());
}

#[test]
fn positions_close_once_decided_and_manual_conflicts_are_refused() {
    let (_tmp, store, team) = setup();
    start_debate(&store, &team, new_debate(None)).unwrap();
    add_position(&store, &team, "debate-1", position("b", "safe", 0.9)).unwrap();

    let manual = DecideRequest {
        actor: "a".to_string(),
        option: Some("fast".to_string()),
        ..Default::default()
    };
    let outcome = decide(&store, &team, "debate-1", &manual).unwrap();
    assert_eq!(outcome.decision.method, DecisionMethod::Manual);
    assert_eq!(outcome.decision.option, "fast");

    let other = DecideRequest {
        actor: "a".to_string(),
        option: Some("safe".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        decide(&store, &team, "debate-1", &other),
        Err(TeamOpsError::Conflict(_))
    ));
    assert!(matches!(
        add_position(&store, &team, "debate-1", position("c", "fast", 0.5)),
        Err(TeamOpsError::Conflict(_))
    ));

    // No task linked: apply reports it and the debate stays decided.
    let result = apply_decision(&store, &team, "debate-1", &ApplyRequest::by("a")).unwrap();
    assert_eq!(result, ApplyOutcome::NoTaskLinked);
    let stored = get_debate(&store, &team, "debate-1").unwrap().unwrap();
    assert_eq!(stored.status(), DebateStatus::Decided);
}

#[test]
fn decide_failures_leave_the_debate_open() {
    let (_tmp, store, team) = setup();
    start_debate(&store, &team, new_debate(None)).unwrap();
    let auto = DecideRequest {
        actor: "orchestrator".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        decide(&store, &team, "debate-1", &auto),
        Err(TeamOpsError::Conflict(_))
    ));

    add_position(&store, &team, "debate-1", position("a", "fast", 0.7)).unwrap();
    let strict = DecideRequest {
        strict: true,
        ..auto.clone()
    };
    let err = decide(&store, &team, "debate-1", &strict).unwrap_err();
    assert!(err.to_string().contains("b, c"), "{err}");
    assert!(matches!(
        apply_decision(&store, &team, "debate-1", &ApplyRequest::by("a")),
        Err(TeamOpsError::Conflict(_))
    ));
    let stored = get_debate(&store, &team, "debate-1").unwrap().unwrap();
    assert_eq!(stored.status(), DebateStatus::Open);

    let outcome = decide(&store, &team, "debate-1", &auto).unwrap();
    assert_eq!(outcome.decision.method, DecisionMethod::Score);
    assert_eq!(outcome.decision.decided_by, "orchestrator");
}

#[test]
fn owner_map_is_validated_before_touching_the_task() {
    let (_tmp, store, team) = setup();
    add_task(&store, &team, NewTask::titled("t"), "a").unwrap();
    start_debate(&store, &team, new_debate(Some("task-1"))).unwrap();
    add_position(&store, &team, "debate-1", position("a", "safe", 1.0)).unwrap();
    decide(
        &store,
        &team,
        "debate-1",
        &DecideRequest {
            actor: "a".to_string(),
            ..Default::default()
        },
    )
    .unwrap();

    let mut bad_key = ApplyRequest::by("a");
    bad_key.owner_map.insert("slow".to_string(), "b".to_string());
    let mut bad_owner = ApplyRequest::by("a");
    bad_owner.owner_map.insert("safe".to_string(), "zed".to_string());
    for req in [bad_key, bad_owner] {
        assert!(matches!(
            apply_decision(&store, &team, "debate-1", &req),
            Err(TeamOpsError::InvalidInput(_))
        ));
    }
    let task = get_task(&store, &team, "task-1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.notes.is_empty());
}

#[test]
fn legacy_positions_without_confidence_weigh_one() {
    let (_tmp, store, team) = setup();
    start_debate(&store, &team, new_debate(None)).unwrap();
    let path = store.team_dir(&team).join("debates.json");
    let mut board: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    board["debates"][0]["positions"] = serde_json::json!([
        {"member": "b", "option": "safe", "at": "1Z"},
        {"member": "a", "option": "fast", "confidence": "high", "at": "1Z"},
        {"member": "c", "option": "fast", "confidence": 0.5, "at": "1Z"}
    ]);
    fs::write(&path, serde_json::to_vec_pretty(&board).unwrap()).unwrap();

    let debate = get_debate(&store, &team, "debate-1").unwrap().unwrap();
    let scores = debate.scores();
    assert_eq!(scores["safe"], 1.0);
    assert_eq!(scores["fast"], 1.5);
}

#[test]
fn decided_status_without_decision_is_corrupt() {
    let (_tmp, store, team) = setup();
    start_debate(&store, &team, new_debate(None)).unwrap();
    let path = store.team_dir(&team).join("debates.json");
    let raw = fs::read_to_string(&path).unwrap();
    fs::write(&path, raw.replace("\"open\"", "\"decided\"")).unwrap();
    assert!(matches!(
        list_debates(&store, &team),
        Err(TeamOpsError::CorruptState { .. })
    ));
}

fn decided_debate_with_task(store: &Store, team: &TeamId) {
    add_task(store, team, NewTask::titled("choose rollout"), "a").unwrap();
    start_debate(store, team, new_debate(Some("task-1"))).unwrap();
    add_position(store, team, "debate-1", position("a", "safe", 0.8)).unwrap();
    add_position(store, team, "debate-1", position("b", "fast", 0.3)).unwrap();
    let req = DecideRequest {
        actor: "a".to_string(),
        ..Default::default()
    };
    decide(store, team, "debate-1", &req).unwrap();
}

#[test]
fn rejected_actor_leaves_task_and_debate_untouched() {
    let (_tmp, store, team) = setup();
    decided_debate_with_task(&store, &team);
    let task_before = get_task(&store, &team, "task-1").unwrap().unwrap();
    let debate_before = get_debate(&store, &team, "debate-1").unwrap().unwrap();

    for actor in ["ops bot", "unassigned"] {
        assert!(matches!(
            apply_decision(&store, &team, "debate-1", &ApplyRequest::by(actor)),
            Err(TeamOpsError::InvalidInput(_))
        ));
        assert_eq!(get_task(&store, &team, "task-1").unwrap().unwrap(), task_before);
        assert_eq!(
            get_debate(&store, &team, "debate-1").unwrap().unwrap(),
            debate_before
        );
        assert!(inbox(&store, &team, "b").unwrap().messages.is_empty());
    }

    let outcome =
        apply_decision(&store, &team, "debate-1", &ApplyRequest::by("ops-bot")).unwrap();
    assert_eq!(outcome.label(), "applied");
    assert_eq!(inbox(&store, &team, "b").unwrap().messages.len(), 1);
}

#[test]
fn decided_and_applied_boards_round_trip_through_the_store() {
    let (_tmp, store, team) = setup();
    decided_debate_with_task(&store, &team);
    start_debate(&store, &team, new_debate(None)).unwrap();
    let records = store.records(&team);

    let decided = records.load::<DebateBoard>().unwrap();
    assert_eq!(decided.debates[0].status(), DebateStatus::Decided);
    records.save(&decided).unwrap();
    assert_eq!(records.load::<DebateBoard>().unwrap(), decided);

    let mut apply = ApplyRequest::by("a");
    apply.owner_map.insert("safe".to_string(), "b".to_string());
    apply_decision(&store, &team, "debate-1", &apply).unwrap();
    let applied = records.load::<DebateBoard>().unwrap();
    let debate = &applied.debates[0];
    assert_eq!(debate.status(), DebateStatus::Applied);
    assert_eq!(debate.decision().map(|d| d.scores.len()), Some(2));
    assert_eq!(debate.applied().map(|a| a.task_owner.as_str()), Some("b"));
    records.save(&applied).unwrap();
    assert_eq!(records.load::<DebateBoard>().unwrap(), applied);
}

#[test]
fn hand_edited_positions_are_reported_as_corrupt() {
    let (_tmp, store, team) = setup();
    start_debate(&store, &team, new_debate(None)).unwrap();
    let path = store.team_dir(&team).join("debates.json");
    let pristine: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

    let cases = [
        (
            serde_json::json!({"member": "zed", "option": "fast", "confidence": 0.5, "at": "1Z"}),
            "debates[0].positions[0].member",
        ),
        (
            serde_json::json!({"member": "a", "option": "fast", "confidence": -5.0, "at": "1Z"}),
            "debates[0].positions[0].confidence",
        ),
    ];
    for (position, needle) in cases {
        let mut board = pristine.clone();
        board["debates"][0]["positions"] = serde_json::json!([position]);
        fs::write(&path, serde_json::to_vec_pretty(&board).unwrap()).unwrap();
        match get_debate(&store, &team, "debate-1") {
            Err(err @ TeamOpsError::CorruptState { .. }) => {
                assert!(err.to_string().contains(needle), "{err}");
            }
            other => panic!("expected CorruptState for {needle}, got {other:?}"),
        }
    }
}
