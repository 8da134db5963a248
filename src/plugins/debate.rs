//! Debate engine: options, weighted positions, deterministic decisions, and
//! idempotent application of a decision onto a linked task.
//!
//! A debate moves strictly forward through `open -> decided -> applied`. The
//! stage is a tagged enum flattened into the record, so the decision and the
//! applied snapshot exist exactly when the status says they do.
//!
//! Scoring sums each member's latest position confidence per option. Ties at
//! the top go to the decider's own pick when it is among them, otherwise to
//! the lexicographically smallest option.

use crate::core::config::resolve_actor;
use crate::core::error::{Result, TeamOpsError};
use crate::core::lock::with_team_lock;
use crate::core::monitor::Monitor;
use crate::core::output::{OutputFormat, compact_line, print_result};
use crate::core::records::{Record, format_seq_id, reconcile_next_id};
use crate::core::store::{Store, TeamId};
use crate::core::time;
use crate::plugins::messages::{append_message, broadcast_message};
use crate::plugins::orchestrate::{OrchestrateArgs, run_orchestrate_cli};
use crate::plugins::tasks::{Task, TaskBoard, TaskStatus, TaskUpdate};
use crate::plugins::team::{Team, load_team, require_valid_member_id, split_list};
use clap::Subcommand;
use colored::Colorize;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::info;

pub const DEBATES_FILE: &str = "debates.json";
pub const DEBATE_ID_PREFIX: &str = "debate";

/// Scores closer than this are a tie.
pub const SCORE_EPSILON: f64 = 1e-9;

/// Weight of a position whose confidence is missing or not a number.
const DEFAULT_WEIGHT: f64 = 1.0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Position {
    pub member: String,
    pub option: String,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale: String,
    pub at: String,
}

impl Position {
    pub fn weight(&self) -> f64 {
        self.confidence
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_WEIGHT)
    }
}

/// Older positions may carry no confidence or a non-numeric one; both count
/// as the default weight instead of failing the whole board.
fn lenient_confidence<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| v.as_f64()).filter(|c| c.is_finite()))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMethod {
    Manual,
    Score,
    TieDecider,
    TieLexical,
    /// Reported (never stored) when decide finds a decision already recorded.
    Existing,
}

impl DecisionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Score => "score",
            Self::TieDecider => "tie_decider",
            Self::TieLexical => "tie_lexical",
            Self::Existing => "existing",
        }
    }
}

impl fmt::Display for DecisionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Decision {
    pub option: String,
    pub method: DecisionMethod,
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub rationale: String,
    pub decided_by: String,
    pub at: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppliedRecord {
    pub at: String,
    pub by: String,
    pub task_id: String,
    pub task_status: TaskStatus,
    pub task_owner: String,
    pub option: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DebateStage {
    Open,
    Decided {
        decision: Decision,
    },
    Applied {
        decision: Decision,
        applied: AppliedRecord,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    Open,
    Decided,
    Applied,
}

impl DebateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Decided => "decided",
            Self::Applied => "applied",
        }
    }
}

impl fmt::Display for DebateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Debate {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub options: Vec<String>,
    pub members: Vec<String>,
    pub decider: String,
    #[serde(flatten)]
    pub stage: DebateStage,
    #[serde(default)]
    pub positions: Vec<Position>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Debate {
    pub fn status(&self) -> DebateStatus {
        match self.stage {
            DebateStage::Open => DebateStatus::Open,
            DebateStage::Decided { .. } => DebateStatus::Decided,
            DebateStage::Applied { .. } => DebateStatus::Applied,
        }
    }

    pub fn decision(&self) -> Option<&Decision> {
        match &self.stage {
            DebateStage::Open => None,
            DebateStage::Decided { decision } | DebateStage::Applied { decision, .. } => {
                Some(decision)
            }
        }
    }

    pub fn applied(&self) -> Option<&AppliedRecord> {
        match &self.stage {
            DebateStage::Applied { applied, .. } => Some(applied),
            _ => None,
        }
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    pub fn is_member(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }

    /// Latest position per member, by append order.
    pub fn latest_positions(&self) -> BTreeMap<&str, &Position> {
        let mut latest = BTreeMap::new();
        for position in &self.positions {
            latest.insert(position.member.as_str(), position);
        }
        latest
    }

    /// Debate members without a position, in member order.
    pub fn missing_members(&self) -> Vec<String> {
        let latest = self.latest_positions();
        self.members
            .iter()
            .filter(|m| !latest.contains_key(m.as_str()))
            .cloned()
            .collect()
    }

    /// Per-option totals of the latest positions' weights. Every option is present.
    pub fn scores(&self) -> BTreeMap<String, f64> {
        let mut scores: BTreeMap<String, f64> =
            self.options.iter().map(|o| (o.clone(), 0.0)).collect();
        for position in self.latest_positions().values() {
            if let Some(total) = scores.get_mut(&position.option) {
                *total += position.weight();
            }
        }
        scores
    }

    /// Pick the winning option from the current positions without mutating.
    pub fn compute_decision(&self, decided_by: &str, rationale: &str, now: &str) -> Result<Decision> {
        let latest = self.latest_positions();
        if latest.is_empty() {
            return Err(TeamOpsError::Conflict(format!(
                "debate {} has no positions to decide from",
                self.id
            )));
        }
        let scores = self.scores();
        let top = scores.values().copied().fold(f64::NEG_INFINITY, f64::max);
        if top <= SCORE_EPSILON {
            return Err(TeamOpsError::Conflict(format!(
                "debate {}: every option scored zero; decide manually",
                self.id
            )));
        }
        // BTreeMap iteration keeps `tied` in lexicographic order.
        let tied: Vec<&String> = scores
            .iter()
            .filter(|(_, s)| (top - **s).abs() <= SCORE_EPSILON)
            .map(|(o, _)| o)
            .collect();

        let (option, method) = if tied.len() == 1 {
            (tied[0].clone(), DecisionMethod::Score)
        } else {
            let decider_pick = latest
                .get(self.decider.as_str())
                .map(|p| &p.option)
                .filter(|pick| tied.contains(pick));
            match decider_pick {
                Some(pick) => (pick.clone(), DecisionMethod::TieDecider),
                None => (tied[0].clone(), DecisionMethod::TieLexical),
            }
        };

        Ok(Decision {
            option,
            method,
            scores,
            rationale: rationale.to_string(),
            decided_by: decided_by.to_string(),
            at: now.to_string(),
        })
    }

    pub fn add_position(&mut self, new: NewPosition, now: &str) -> Result<&Position> {
        if self.status() != DebateStatus::Open {
            return Err(TeamOpsError::Conflict(format!(
                "debate {} is {}; positions are only accepted while open",
                self.id,
                self.status()
            )));
        }
        if !self.is_member(&new.member) {
            return Err(TeamOpsError::InvalidInput(format!(
                "'{}' is not a member of debate {} (members: {})",
                new.member,
                self.id,
                self.members.join(", ")
            )));
        }
        if !self.has_option(&new.option) {
            return Err(TeamOpsError::InvalidInput(format!(
                "'{}' is not an option of debate {} (options: {})",
                new.option,
                self.id,
                self.options.join(", ")
            )));
        }
        if !new.confidence.is_finite() || !(0.0..=1.0).contains(&new.confidence) {
            return Err(TeamOpsError::InvalidInput(format!(
                "confidence must be within [0, 1] (got {})",
                new.confidence
            )));
        }
        self.positions.push(Position {
            member: new.member,
            option: new.option,
            confidence: Some(new.confidence),
            rationale: new.rationale.trim().to_string(),
            at: now.to_string(),
        });
        self.updated_at = now.to_string();
        Ok(&self.positions[self.positions.len() - 1])
    }

    pub fn decide(&mut self, req: &DecideRequest, now: &str) -> Result<DecideOutcome> {
        if let Some(decision) = self.decision() {
            if let Some(option) = req.option.as_deref()
                && option != decision.option
            {
                return Err(TeamOpsError::Conflict(format!(
                    "debate {} was already decided as '{}'; refusing '{}'",
                    self.id, decision.option, option
                )));
            }
            return Ok(DecideOutcome {
                decision: decision.clone(),
                existing: true,
            });
        }

        if req.strict {
            let missing = self.missing_members();
            if !missing.is_empty() {
                return Err(TeamOpsError::Conflict(format!(
                    "debate {} is missing positions from: {}",
                    self.id,
                    missing.join(", ")
                )));
            }
        }

        let decision = match req.option.as_deref() {
            Some(option) => {
                if req.actor != self.decider {
                    return Err(TeamOpsError::InvalidInput(format!(
                        "only the decider '{}' may decide debate {} manually",
                        self.decider, self.id
                    )));
                }
                if !self.has_option(option) {
                    return Err(TeamOpsError::InvalidInput(format!(
                        "'{}' is not an option of debate {} (options: {})",
                        option,
                        self.id,
                        self.options.join(", ")
                    )));
                }
                Decision {
                    option: option.to_string(),
                    method: DecisionMethod::Manual,
                    scores: self.options.iter().map(|o| (o.clone(), 0.0)).collect(),
                    rationale: req
                        .rationale
                        .clone()
                        .unwrap_or_else(|| format!("manual decision by {}", req.actor)),
                    decided_by: req.actor.clone(),
                    at: now.to_string(),
                }
            }
            None => {
                let rationale = req
                    .rationale
                    .clone()
                    .unwrap_or_else(|| "decided by confidence-weighted score".to_string());
                self.compute_decision(&req.actor, &rationale, now)?
            }
        };

        self.stage = DebateStage::Decided {
            decision: decision.clone(),
        };
        self.updated_at = now.to_string();
        Ok(DecideOutcome {
            decision,
            existing: false,
        })
    }

    /// Reflect the decision onto the linked task. The task board is mutated in
    /// place; the caller persists both boards.
    pub fn apply_to(
        &mut self,
        team: &Team,
        tasks: &mut TaskBoard,
        req: &ApplyRequest,
        now: &str,
    ) -> Result<ApplyOutcome> {
        let decision = match &self.stage {
            DebateStage::Open => {
                return Err(TeamOpsError::Conflict(format!(
                    "debate {} has no decision to apply",
                    self.id
                )));
            }
            DebateStage::Applied { applied, .. } => {
                return Ok(ApplyOutcome::AlreadyApplied(applied.clone()));
            }
            DebateStage::Decided { decision } => decision.clone(),
        };
        require_valid_member_id(&req.actor)?;

        for (option, owner) in &req.owner_map {
            if !self.has_option(option) {
                return Err(TeamOpsError::InvalidInput(format!(
                    "owner map key '{}' is not an option of debate {}",
                    option, self.id
                )));
            }
            team.require_owner(owner)?;
        }

        let Some(task_id) = self.task_id.clone() else {
            return Ok(ApplyOutcome::NoTaskLinked);
        };

        let note = if decision.rationale.is_empty() {
            format!("{} decided '{}'", self.id, decision.option)
        } else {
            format!(
                "{} decided '{}': {}",
                self.id, decision.option, decision.rationale
            )
        };
        let update = TaskUpdate {
            status: Some(req.task_status),
            owner: req.owner_map.get(&decision.option).cloned(),
            depends_on: None,
            note: Some(note),
        };
        let task = tasks.update(team, &task_id, &update, now)?;

        let applied = AppliedRecord {
            at: now.to_string(),
            by: req.actor.clone(),
            task_id,
            task_status: task.status,
            task_owner: task.owner.clone(),
            option: decision.option.clone(),
        };
        self.stage = DebateStage::Applied {
            decision,
            applied: applied.clone(),
        };
        self.updated_at = now.to_string();
        Ok(ApplyOutcome::Applied(applied))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DebateBoard {
    pub debates: Vec<Debate>,
    #[serde(default)]
    pub next_id: u64,
}

impl Default for DebateBoard {
    fn default() -> Self {
        Self {
            debates: Vec::new(),
            next_id: 1,
        }
    }
}

fn check_unique(field: &str, items: &[String]) -> std::result::Result<(), String> {
    let mut seen = HashSet::new();
    for (idx, item) in items.iter().enumerate() {
        if item.is_empty() {
            return Err(format!("{}[{}]: empty value", field, idx));
        }
        if !seen.insert(item.as_str()) {
            return Err(format!("{}[{}]: duplicate value '{}'", field, idx, item));
        }
    }
    if items.len() < 2 {
        return Err(format!("{}: expected at least 2 entries, found {}", field, items.len()));
    }
    Ok(())
}

impl Record for DebateBoard {
    const FILE_NAME: &'static str = DEBATES_FILE;

    fn check(&mut self) -> std::result::Result<(), String> {
        self.next_id = reconcile_next_id(
            "debates",
            DEBATE_ID_PREFIX,
            self.debates.iter().map(|d| d.id.as_str()),
            Some(self.next_id),
        )?;
        for (idx, debate) in self.debates.iter().enumerate() {
            let at = format!("debates[{}]", idx);
            check_unique(&format!("{}.options", at), &debate.options)?;
            check_unique(&format!("{}.members", at), &debate.members)?;
            if !debate.is_member(&debate.decider) {
                return Err(format!(
                    "{}.decider: '{}' is not a debate member",
                    at, debate.decider
                ));
            }
            for (pidx, position) in debate.positions.iter().enumerate() {
                let pos_at = format!("{}.positions[{}]", at, pidx);
                if !debate.is_member(&position.member) {
                    return Err(format!(
                        "{}.member: '{}' is not a debate member",
                        pos_at, position.member
                    ));
                }
                if !debate.has_option(&position.option) {
                    return Err(format!("{}.option: unknown option '{}'", pos_at, position.option));
                }
                if let Some(confidence) = position.confidence
                    && !(0.0..=1.0).contains(&confidence)
                {
                    return Err(format!(
                        "{}.confidence: expected a value in [0, 1], found {}",
                        pos_at, confidence
                    ));
                }
            }
            if let Some(decision) = debate.decision() {
                if !debate.has_option(&decision.option) {
                    return Err(format!(
                        "{}.decision.option: unknown option '{}'",
                        at, decision.option
                    ));
                }
                if decision.method == DecisionMethod::Existing {
                    return Err(format!("{}.decision.method: 'existing' is never stored", at));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDebate {
    pub topic: String,
    pub task_id: Option<String>,
    pub options: Vec<String>,
    pub members: Vec<String>,
    /// Defaults to the first member.
    pub decider: Option<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub member: String,
    pub option: String,
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecideRequest {
    pub actor: String,
    /// Manual winner; `None` scores the positions.
    pub option: Option<String>,
    pub rationale: Option<String>,
    /// Require a position from every debate member.
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecideOutcome {
    pub decision: Decision,
    /// The decision was already recorded before this call.
    pub existing: bool,
}

impl DecideOutcome {
    pub fn reported_method(&self) -> DecisionMethod {
        if self.existing {
            DecisionMethod::Existing
        } else {
            self.decision.method
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyRequest {
    pub actor: String,
    pub task_status: TaskStatus,
    /// Option -> new task owner.
    pub owner_map: BTreeMap<String, String>,
}

impl ApplyRequest {
    pub fn by(actor: &str) -> Self {
        Self {
            actor: actor.to_string(),
            task_status: TaskStatus::Completed,
            owner_map: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "applied", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied(AppliedRecord),
    AlreadyApplied(AppliedRecord),
    NoTaskLinked,
}

impl ApplyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::AlreadyApplied(_) => "already applied",
            Self::NoTaskLinked => "no task linked",
        }
    }
}

fn normalize_unique(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.to_string()))
        .map(str::to_string)
        .collect()
}

impl DebateBoard {
    pub fn find(&self, id: &str) -> Option<&Debate> {
        self.debates.iter().find(|d| d.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Result<&mut Debate> {
        self.debates
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| TeamOpsError::InvalidInput(format!("debate not found: {}", id)))
    }

    pub fn create(
        &mut self,
        team: &Team,
        tasks: &TaskBoard,
        new: NewDebate,
        now: &str,
    ) -> Result<&Debate> {
        let topic = new.topic.trim();
        if topic.is_empty() {
            return Err(TeamOpsError::InvalidInput("debate topic must not be empty".to_string()));
        }
        let options = normalize_unique(&new.options);
        if options.len() < 2 {
            return Err(TeamOpsError::InvalidInput(format!(
                "a debate needs at least 2 unique options (got {})",
                options.len()
            )));
        }
        let members = normalize_unique(&new.members);
        if members.len() < 2 {
            return Err(TeamOpsError::InvalidInput(format!(
                "a debate needs at least 2 unique members (got {})",
                members.len()
            )));
        }
        for member in &members {
            team.require_member(member)?;
        }
        let decider = match new.decider.as_deref().map(str::trim) {
            Some(decider) => decider.to_string(),
            None => members[0].clone(),
        };
        if !members.contains(&decider) {
            return Err(TeamOpsError::InvalidInput(format!(
                "decider '{}' must be one of the debate members ({})",
                decider,
                members.join(", ")
            )));
        }
        let task_id = new
            .task_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if let Some(task_id) = &task_id
            && tasks.find(task_id).is_none()
        {
            return Err(TeamOpsError::InvalidInput(format!("task not found: {}", task_id)));
        }

        let id = format_seq_id(DEBATE_ID_PREFIX, self.next_id);
        self.debates.push(Debate {
            id,
            topic: topic.to_string(),
            task_id,
            options,
            members,
            decider,
            stage: DebateStage::Open,
            positions: Vec::new(),
            created_by: new.created_by,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        });
        self.next_id += 1;
        Ok(&self.debates[self.debates.len() - 1])
    }
}

/// Create a debate. Caller holds the team lock.
pub(crate) fn start_locked(
    store: &Store,
    team: &TeamId,
    team_rec: &Team,
    new: NewDebate,
    monitor: &Monitor,
) -> Result<Debate> {
    let records = store.records(team);
    let tasks = records.load::<TaskBoard>()?;
    let mut board = records.load::<DebateBoard>()?;
    let debate = board
        .create(team_rec, &tasks, new, &time::now_epoch_z())?
        .clone();
    records.save(&board)?;

    info!(team = %team, debate = %debate.id, "debate started");
    monitor
        .event("debate.started", &debate.created_by)
        .entity("debate", &debate.id)
        .after(serde_json::json!({ "status": debate.status() }))
        .metadata(serde_json::json!({
            "topic": debate.topic,
            "task_id": debate.task_id,
            "options": debate.options,
            "members": debate.members,
            "decider": debate.decider,
        }))
        .emit();
    Ok(debate)
}

/// Decide a debate. Caller holds the team lock.
pub(crate) fn decide_locked(
    store: &Store,
    team: &TeamId,
    debate_id: &str,
    req: &DecideRequest,
    monitor: &Monitor,
) -> Result<DecideOutcome> {
    let records = store.records(team);
    let mut board = records.load::<DebateBoard>()?;
    let debate = board.find_mut(debate_id)?;
    let outcome = debate.decide(req, &time::now_epoch_z())?;
    if outcome.existing {
        return Ok(outcome);
    }
    records.save(&board)?;

    let decision = &outcome.decision;
    info!(team = %team, debate = debate_id, option = %decision.option, method = %decision.method, "debate decided");
    monitor
        .event("debate.decided", &req.actor)
        .entity("debate", debate_id)
        .before(serde_json::json!({ "status": DebateStatus::Open }))
        .after(serde_json::json!({
            "status": DebateStatus::Decided,
            "option": decision.option,
            "method": decision.method,
        }))
        .metadata(serde_json::json!({ "scores": decision.scores }))
        .emit();
    Ok(outcome)
}

/// Apply a decided debate to its task. Caller holds the team lock.
///
/// The task board is saved before the debate board; if the process dies in
/// between, a retry re-applies the same owner and status.
pub(crate) fn apply_locked(
    store: &Store,
    team: &TeamId,
    team_rec: &Team,
    debate_id: &str,
    req: &ApplyRequest,
    monitor: &Monitor,
) -> Result<ApplyOutcome> {
    let records = store.records(team);
    let mut board = records.load::<DebateBoard>()?;
    let mut tasks = records.load::<TaskBoard>()?;
    let debate = board.find_mut(debate_id)?;
    let before = debate
        .task_id
        .as_deref()
        .and_then(|id| tasks.find(id))
        .map(Task::snapshot);
    let outcome = debate.apply_to(team_rec, &mut tasks, req, &time::now_epoch_z())?;
    let applied = match outcome {
        ApplyOutcome::Applied(applied) => applied,
        other => return Ok(other),
    };
    // Everything that can be rejected is checked before the first save.
    let notice = broadcast_message(
        &req.actor,
        &format!(
            "{} applied '{}' to {} (status {}, owner {})",
            debate_id, applied.option, applied.task_id, applied.task_status, applied.task_owner
        ),
    )?;
    records.save(&tasks)?;
    records.save(&board)?;
    append_message(&records, &notice)?;

    info!(team = %team, debate = debate_id, task = %applied.task_id, "debate applied");

    let after = tasks.find(&applied.task_id).map(Task::snapshot);
    let mut event = monitor
        .event("debate.applied", &req.actor)
        .entity("task", &applied.task_id)
        .metadata(serde_json::json!({ "debate_id": debate_id, "option": applied.option }));
    if let Some(before) = before {
        event = event.before(before);
    }
    if let Some(after) = after {
        event = event.after(after);
    }
    event.emit();
    Ok(ApplyOutcome::Applied(applied))
}

pub fn start_debate(store: &Store, team: &TeamId, new: NewDebate) -> Result<Debate> {
    with_team_lock(store, team, || {
        let team_rec = load_team(store, team)?;
        let monitor = Monitor::new(store, team, "debate.start");
        start_locked(store, team, &team_rec, new, &monitor)
    })
}

pub fn add_position(
    store: &Store,
    team: &TeamId,
    debate_id: &str,
    new: NewPosition,
) -> Result<Position> {
    with_team_lock(store, team, || {
        load_team(store, team)?;
        let records = store.records(team);
        let mut board = records.load::<DebateBoard>()?;
        let debate = board.find_mut(debate_id)?;
        let position = debate.add_position(new, &time::now_epoch_z())?.clone();
        let missing = debate.missing_members();
        records.save(&board)?;

        info!(team = %team, debate = debate_id, member = %position.member, "position recorded");
        Monitor::new(store, team, "debate.position")
            .event("debate.position", &position.member)
            .entity("debate", debate_id)
            .after(serde_json::json!({
                "option": position.option,
                "confidence": position.confidence,
            }))
            .metadata(serde_json::json!({ "missing": missing }))
            .emit();
        Ok(position)
    })
}

pub fn decide(
    store: &Store,
    team: &TeamId,
    debate_id: &str,
    req: &DecideRequest,
) -> Result<DecideOutcome> {
    with_team_lock(store, team, || {
        load_team(store, team)?;
        let monitor = Monitor::new(store, team, "debate.decide");
        decide_locked(store, team, debate_id, req, &monitor)
    })
}

pub fn apply_decision(
    store: &Store,
    team: &TeamId,
    debate_id: &str,
    req: &ApplyRequest,
) -> Result<ApplyOutcome> {
    with_team_lock(store, team, || {
        let team_rec = load_team(store, team)?;
        let monitor = Monitor::new(store, team, "debate.apply");
        apply_locked(store, team, &team_rec, debate_id, req, &monitor)
    })
}

pub fn list_debates(store: &Store, team: &TeamId) -> Result<Vec<Debate>> {
    load_team(store, team)?;
    Ok(store.records(team).load::<DebateBoard>()?.debates)
}

pub fn get_debate(store: &Store, team: &TeamId, debate_id: &str) -> Result<Option<Debate>> {
    load_team(store, team)?;
    let board = store.records(team).load::<DebateBoard>()?;
    Ok(board.find(debate_id).cloned())
}

/// Parse `option=owner,option=owner` into a map.
pub fn parse_owner_map(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for entry in split_list(raw) {
        let Some((option, owner)) = entry.split_once('=') else {
            return Err(TeamOpsError::InvalidInput(format!(
                "owner map entry '{}' must look like option=owner",
                entry
            )));
        };
        let (option, owner) = (option.trim(), owner.trim());
        if option.is_empty() || owner.is_empty() {
            return Err(TeamOpsError::InvalidInput(format!(
                "owner map entry '{}' must look like option=owner",
                entry
            )));
        }
        map.insert(option.to_string(), owner.to_string());
    }
    Ok(map)
}

fn debate_line(debate: &Debate) -> String {
    let status = match debate.status() {
        DebateStatus::Open => debate.status().as_str().yellow(),
        DebateStatus::Decided => debate.status().as_str().cyan(),
        DebateStatus::Applied => debate.status().as_str().green(),
    };
    let outcome = debate
        .decision()
        .map(|d| format!(" -> {} ({})", d.option, d.method))
        .unwrap_or_default();
    format!(
        "{} [{}] task={} {}{}",
        debate.id,
        status,
        debate.task_id.as_deref().unwrap_or("-"),
        compact_line(&debate.topic, 80),
        outcome
    )
}

fn debate_detail(debate: &Debate) -> Vec<String> {
    let mut lines = vec![
        debate_line(debate),
        format!("  options: {}", debate.options.join(", ")),
        format!("  members: {} (decider {})", debate.members.join(", "), debate.decider),
    ];
    for position in debate.latest_positions().values() {
        lines.push(format!(
            "  {} -> {} @{:.2} {}",
            position.member,
            position.option,
            position.weight(),
            compact_line(&position.rationale, 60)
        ));
    }
    let missing = debate.missing_members();
    if !missing.is_empty() {
        lines.push(format!("  missing: {}", missing.join(", ")));
    }
    if let Some(applied) = debate.applied() {
        lines.push(format!(
            "  applied to {} by {} (status {}, owner {})",
            applied.task_id, applied.by, applied.task_status, applied.task_owner
        ));
    }
    lines
}

#[derive(clap::Args, Debug)]
pub struct DebateCli {
    #[clap(subcommand)]
    pub command: DebateCommand,
}

#[derive(Subcommand, Debug)]
pub enum DebateCommand {
    /// Open a debate over a set of options.
    Start {
        #[clap(long)]
        team: String,
        #[clap(long)]
        topic: String,
        /// Comma-separated options (at least 2).
        #[clap(long)]
        options: String,
        /// Comma-separated team members (at least 2).
        #[clap(long)]
        members: String,
        /// Defaults to the first member.
        #[clap(long)]
        decider: Option<String>,
        #[clap(long)]
        task: Option<String>,
        #[clap(long)]
        by: Option<String>,
    },
    /// Record or replace a member's position.
    Position {
        #[clap(long)]
        team: String,
        #[clap(long)]
        id: String,
        #[clap(long)]
        member: String,
        #[clap(long)]
        option: String,
        #[clap(long, default_value_t = 1.0)]
        confidence: f64,
        #[clap(long, default_value = "")]
        rationale: String,
    },
    /// List debates.
    List {
        #[clap(long)]
        team: String,
    },
    /// Show one debate with its current positions.
    Show {
        #[clap(long)]
        team: String,
        #[clap(long)]
        id: String,
    },
    /// Decide manually (decider only) or by score.
    Decide {
        #[clap(long)]
        team: String,
        #[clap(long)]
        id: String,
        /// Manual winner; omit to score positions.
        #[clap(long)]
        option: Option<String>,
        #[clap(long)]
        rationale: Option<String>,
        /// Require a position from every member.
        #[clap(long)]
        strict: bool,
        #[clap(long)]
        by: Option<String>,
    },
    /// Apply the decision to the linked task.
    Apply {
        #[clap(long)]
        team: String,
        #[clap(long)]
        id: String,
        #[clap(long, value_enum, default_value_t = TaskStatus::Completed)]
        status: TaskStatus,
        /// `option=owner` pairs, comma-separated.
        #[clap(long, default_value = "")]
        owner_map: String,
        #[clap(long)]
        by: Option<String>,
    },
    /// Advance a debate by one orchestration step.
    Orchestrate(OrchestrateArgs),
}

pub fn run_debate_cli(store: &Store, format: OutputFormat, cli: DebateCli) -> Result<()> {
    match cli.command {
        DebateCommand::Start {
            team,
            topic,
            options,
            members,
            decider,
            task,
            by,
        } => {
            let team = TeamId::parse(&team)?;
            let new = NewDebate {
                topic,
                task_id: task,
                options: split_list(&options),
                members: split_list(&members),
                decider,
                created_by: resolve_actor(by.as_deref()),
            };
            let debate = start_debate(store, &team, new)?;
            let envelope = time::command_envelope(
                "debate.start",
                "ok",
                serde_json::json!({ "team": team.as_str(), "debate": debate }),
            );
            print_result(format, &envelope, &[format!("started {}", debate_line(&debate))]);
        }
        DebateCommand::Position {
            team,
            id,
            member,
            option,
            confidence,
            rationale,
        } => {
            let team = TeamId::parse(&team)?;
            let new = NewPosition {
                member,
                option,
                confidence,
                rationale,
            };
            let position = add_position(store, &team, &id, new)?;
            let envelope = time::command_envelope(
                "debate.position",
                "ok",
                serde_json::json!({ "team": team.as_str(), "debate_id": id, "position": position }),
            );
            let line = format!(
                "{}: {} -> {} @{:.2}",
                id,
                position.member,
                position.option,
                position.weight()
            );
            print_result(format, &envelope, &[line]);
        }
        DebateCommand::List { team } => {
            let team = TeamId::parse(&team)?;
            let debates = list_debates(store, &team)?;
            let mut lines: Vec<String> = debates.iter().map(debate_line).collect();
            if lines.is_empty() {
                lines.push("no debates".to_string());
            }
            let envelope = time::command_envelope(
                "debate.list",
                "ok",
                serde_json::json!({ "team": team.as_str(), "debates": debates }),
            );
            print_result(format, &envelope, &lines);
        }
        DebateCommand::Show { team, id } => {
            let team = TeamId::parse(&team)?;
            let debate = get_debate(store, &team, &id)?
                .ok_or_else(|| TeamOpsError::InvalidInput(format!("debate not found: {}", id)))?;
            let envelope = time::command_envelope(
                "debate.show",
                "ok",
                serde_json::json!({
                    "team": team.as_str(),
                    "debate": debate,
                    "missing": debate.missing_members(),
                    "scores": debate.scores(),
                }),
            );
            print_result(format, &envelope, &debate_detail(&debate));
        }
        DebateCommand::Decide {
            team,
            id,
            option,
            rationale,
            strict,
            by,
        } => {
            let team = TeamId::parse(&team)?;
            let req = DecideRequest {
                actor: resolve_actor(by.as_deref()),
                option,
                rationale,
                strict,
            };
            let outcome = decide(store, &team, &id, &req)?;
            let method = outcome.reported_method();
            let envelope = time::command_envelope(
                "debate.decide",
                "ok",
                serde_json::json!({
                    "team": team.as_str(),
                    "debate_id": id,
                    "method": method,
                    "decision": outcome.decision,
                }),
            );
            let line = format!("{}: decided {} ({})", id, outcome.decision.option, method);
            print_result(format, &envelope, &[line]);
        }
        DebateCommand::Apply {
            team,
            id,
            status,
            owner_map,
            by,
        } => {
            let team = TeamId::parse(&team)?;
            let req = ApplyRequest {
                actor: resolve_actor(by.as_deref()),
                task_status: status,
                owner_map: parse_owner_map(&owner_map)?,
            };
            let outcome = apply_decision(store, &team, &id, &req)?;
            let envelope = time::command_envelope(
                "debate.apply",
                "ok",
                serde_json::json!({ "team": team.as_str(), "debate_id": id, "result": outcome }),
            );
            print_result(format, &envelope, &[format!("{}: {}", id, outcome.label())]);
        }
        DebateCommand::Orchestrate(args) => run_orchestrate_cli(store, format, args)?,
    }
    Ok(())
}
