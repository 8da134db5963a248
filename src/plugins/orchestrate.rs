//! Single-shot orchestration step for one debate.
//!
//! Each call takes the team lock once and advances the debate by at most one
//! forward transition: create, remind and wait, decide, or apply. An external
//! scheduler re-invokes it until the debate reports `applied`; further calls
//! are no-ops.

use crate::core::config::resolve_actor;
use crate::core::error::{Result, TeamOpsError};
use crate::core::lock::with_team_lock;
use crate::core::monitor::Monitor;
use crate::core::output::{OutputFormat, print_result};
use crate::core::store::{Store, TeamId};
use crate::core::time;
use crate::plugins::debate::{
    AppliedRecord, ApplyOutcome, ApplyRequest, Debate, DebateBoard, DebateStage, DebateStatus,
    DecideRequest, Decision, NewDebate, apply_locked, decide_locked, parse_owner_map,
    start_locked,
};
use crate::plugins::messages::append_direct;
use crate::plugins::tasks::TaskStatus;
use crate::plugins::team::{load_team, split_list};
use serde::Serialize;
use tracing::{debug, info};

pub const ORCHESTRATE_COMMAND: &str = "debate.orchestrate";
const DEFAULT_RATIONALE: &str = "orchestrated: every member submitted a position";

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrateRequest {
    pub debate_id: Option<String>,
    /// Parameters for creating the debate on the first call.
    pub create: Option<NewDebate>,
    pub actor: String,
    /// Send a direct reminder to each member still missing a position.
    pub remind: bool,
    pub apply: ApplyRequest,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Waiting {
        missing: Vec<String>,
        reminded: Vec<String>,
    },
    Decided {
        decision: Decision,
    },
    Applied {
        applied: AppliedRecord,
    },
    AlreadyApplied {
        applied: AppliedRecord,
    },
    NoTaskLinked,
}

impl StepAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting { .. } => "waiting",
            Self::Decided { .. } => "decided",
            Self::Applied { .. } => "applied",
            Self::AlreadyApplied { .. } => "already applied",
            Self::NoTaskLinked => "no task linked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub debate_id: String,
    pub created: bool,
    pub status: DebateStatus,
    #[serde(flatten)]
    pub action: StepAction,
    pub correlation_id: String,
}

/// Find the debate a request refers to. A request carrying creation
/// parameters but no id matches an earlier debate with the same topic and
/// linked task, so repeated calls do not spawn duplicates.
fn resolve(board: &DebateBoard, req: &OrchestrateRequest) -> Result<Option<Debate>> {
    if let Some(id) = req.debate_id.as_deref() {
        return match board.find(id) {
            Some(debate) => Ok(Some(debate.clone())),
            None if req.create.is_some() => Ok(None),
            None => Err(TeamOpsError::InvalidInput(format!("debate not found: {}", id))),
        };
    }
    let Some(new) = &req.create else {
        return Err(TeamOpsError::InvalidInput(
            "orchestrate needs a debate id or --topic/--options/--members to create one"
                .to_string(),
        ));
    };
    let task_id = new.task_id.as_deref().map(str::trim).filter(|t| !t.is_empty());
    Ok(board
        .debates
        .iter()
        .rev()
        .find(|d| d.topic == new.topic.trim() && d.task_id.as_deref() == task_id)
        .cloned())
}

pub fn orchestrate_step(store: &Store, team: &TeamId, req: &OrchestrateRequest) -> Result<StepReport> {
    with_team_lock(store, team, || {
        let team_rec = load_team(store, team)?;
        let records = store.records(team);
        let monitor = Monitor::new(store, team, ORCHESTRATE_COMMAND);

        let (debate, created) = match resolve(&records.load::<DebateBoard>()?, req)? {
            Some(debate) => (debate, false),
            None => {
                let new = req.create.clone().ok_or_else(|| {
                    TeamOpsError::InvalidInput("missing debate creation parameters".to_string())
                })?;
                let debate = start_locked(store, team, &team_rec, new, &monitor)?;
                monitor
                    .event("orchestrate.started", &req.actor)
                    .entity("debate", &debate.id)
                    .metadata(serde_json::json!({ "task_id": debate.task_id }))
                    .emit();
                (debate, true)
            }
        };
        let report = |status: DebateStatus, action: StepAction| StepReport {
            debate_id: debate.id.clone(),
            created,
            status,
            action,
            correlation_id: monitor.correlation_id().to_string(),
        };

        match &debate.stage {
            DebateStage::Applied { applied, .. } => {
                debug!(debate = %debate.id, "orchestrate: already applied");
                Ok(report(
                    DebateStatus::Applied,
                    StepAction::AlreadyApplied {
                        applied: applied.clone(),
                    },
                ))
            }
            DebateStage::Open => {
                let missing = debate.missing_members();
                if !missing.is_empty() {
                    let mut reminded = Vec::new();
                    if req.remind {
                        let body = format!(
                            "Reminder: {} ('{}') is waiting on your position. Options: {}",
                            debate.id,
                            debate.topic,
                            debate.options.join(", ")
                        );
                        for member in &missing {
                            append_direct(&records, &team_rec, &req.actor, member, &body)?;
                            reminded.push(member.clone());
                        }
                    }
                    info!(debate = %debate.id, missing = missing.len(), "orchestrate: waiting on positions");
                    monitor
                        .event("orchestrate.waiting", &req.actor)
                        .entity("debate", &debate.id)
                        .metadata(serde_json::json!({ "missing": missing, "reminded": reminded }))
                        .emit();
                    return Ok(report(DebateStatus::Open, StepAction::Waiting { missing, reminded }));
                }

                let decide = DecideRequest {
                    actor: req.actor.clone(),
                    option: None,
                    rationale: Some(
                        req.rationale
                            .clone()
                            .unwrap_or_else(|| DEFAULT_RATIONALE.to_string()),
                    ),
                    strict: true,
                };
                let outcome = decide_locked(store, team, &debate.id, &decide, &monitor)?;
                monitor
                    .event("orchestrate.decided", &req.actor)
                    .entity("debate", &debate.id)
                    .metadata(serde_json::json!({
                        "option": outcome.decision.option,
                        "method": outcome.decision.method,
                    }))
                    .emit();
                Ok(report(
                    DebateStatus::Decided,
                    StepAction::Decided {
                        decision: outcome.decision,
                    },
                ))
            }
            DebateStage::Decided { .. } => {
                let outcome =
                    apply_locked(store, team, &team_rec, &debate.id, &req.apply, &monitor)?;
                let (status, action) = match outcome {
                    ApplyOutcome::Applied(applied) => {
                        (DebateStatus::Applied, StepAction::Applied { applied })
                    }
                    ApplyOutcome::AlreadyApplied(applied) => {
                        (DebateStatus::Applied, StepAction::AlreadyApplied { applied })
                    }
                    ApplyOutcome::NoTaskLinked => (DebateStatus::Decided, StepAction::NoTaskLinked),
                };
                monitor
                    .event("orchestrate.completed", &req.actor)
                    .entity("debate", &debate.id)
                    .metadata(serde_json::json!({ "outcome": action.label() }))
                    .emit();
                Ok(report(status, action))
            }
        }
    })
}

#[derive(clap::Args, Debug)]
pub struct OrchestrateArgs {
    #[clap(long)]
    pub team: String,
    /// Existing debate to advance.
    #[clap(long)]
    pub id: Option<String>,
    /// Topic for a debate created on the first call.
    #[clap(long)]
    pub topic: Option<String>,
    #[clap(long)]
    pub options: Option<String>,
    #[clap(long)]
    pub members: Option<String>,
    #[clap(long)]
    pub decider: Option<String>,
    #[clap(long)]
    pub task: Option<String>,
    /// Message members who have not taken a position yet.
    #[clap(long)]
    pub remind: bool,
    #[clap(long, value_enum, default_value_t = TaskStatus::Completed)]
    pub status: TaskStatus,
    #[clap(long, default_value = "")]
    pub owner_map: String,
    #[clap(long)]
    pub rationale: Option<String>,
    #[clap(long)]
    pub by: Option<String>,
}

impl OrchestrateArgs {
    fn into_request(self) -> Result<OrchestrateRequest> {
        let actor = resolve_actor(self.by.as_deref());
        let create = match self.topic {
            Some(topic) => Some(NewDebate {
                topic,
                task_id: self.task,
                options: split_list(self.options.as_deref().unwrap_or_default()),
                members: split_list(self.members.as_deref().unwrap_or_default()),
                decider: self.decider,
                created_by: actor.clone(),
            }),
            None => None,
        };
        Ok(OrchestrateRequest {
            debate_id: self.id,
            create,
            apply: ApplyRequest {
                actor: actor.clone(),
                task_status: self.status,
                owner_map: parse_owner_map(&self.owner_map)?,
            },
            actor,
            remind: self.remind,
            rationale: self.rationale,
        })
    }
}

fn step_line(report: &StepReport) -> String {
    let detail = match &report.action {
        StepAction::Waiting { missing, reminded } if !reminded.is_empty() => {
            format!("missing {} (reminded)", missing.join(", "))
        }
        StepAction::Waiting { missing, .. } => format!("missing {}", missing.join(", ")),
        StepAction::Decided { decision } => format!("{} ({})", decision.option, decision.method),
        StepAction::Applied { applied } | StepAction::AlreadyApplied { applied } => format!(
            "{} -> {} (status {}, owner {})",
            applied.option, applied.task_id, applied.task_status, applied.task_owner
        ),
        StepAction::NoTaskLinked => String::new(),
    };
    let created = if report.created { " (created)" } else { "" };
    format!(
        "{}{}: {} {}",
        report.debate_id,
        created,
        report.action.label(),
        detail
    )
    .trim_end()
    .to_string()
}

pub fn run_orchestrate_cli(store: &Store, format: OutputFormat, args: OrchestrateArgs) -> Result<()> {
    let team = TeamId::parse(&args.team)?;
    let req = args.into_request()?;
    let report = orchestrate_step(store, &team, &req)?;
    let envelope = time::command_envelope(
        "debate.orchestrate",
        "ok",
        serde_json::json!({ "team": team.as_str(), "step": report }),
    );
    print_result(format, &envelope, &[step_line(&report)]);
    Ok(())
}
