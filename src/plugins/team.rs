//! Team plugin: the team record and its membership rules.
//!
//! The team record is the root of all per-team state. It is written once by
//! `init` and only replaced by an explicit reset (`init --force`), which also
//! rebuilds the task board, debate board, and message log.

use crate::core::error::{Result, TeamOpsError};
use crate::core::lock::with_team_lock;
use crate::core::monitor::Monitor;
use crate::core::output::{OutputFormat, print_result};
use crate::core::records::Record;
use crate::core::store::{Store, TeamId};
use crate::core::time;
use crate::plugins::debate::DebateBoard;
use crate::plugins::messages::MESSAGES_LOG;
use crate::plugins::tasks::TaskBoard;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use tracing::info;

pub const TEAM_FILE: &str = "team.json";
/// Owner sentinel for tasks nobody has picked up.
pub const UNASSIGNED: &str = "unassigned";
/// Recipient wildcard used by broadcasts.
pub const BROADCAST_RECIPIENT: &str = "*";

const MAX_MEMBER_ID_LEN: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Team {
    pub team_name: String,
    pub goal: String,
    pub members: Vec<String>,
    pub created_at: String,
}

impl Record for Team {
    const FILE_NAME: &'static str = TEAM_FILE;

    fn check(&mut self) -> std::result::Result<(), String> {
        if self.members.is_empty() {
            return Err("members: expected at least one member".to_string());
        }
        let mut seen = HashSet::new();
        for (idx, member) in self.members.iter().enumerate() {
            validate_member_id(member).map_err(|e| format!("members[{}]: {}", idx, e))?;
            if !seen.insert(member.as_str()) {
                return Err(format!("members[{}]: duplicate member '{}'", idx, member));
            }
        }
        Ok(())
    }
}

impl Team {
    pub fn is_member(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }

    pub fn require_member(&self, member: &str) -> Result<()> {
        if self.is_member(member) {
            Ok(())
        } else {
            Err(TeamOpsError::InvalidInput(format!(
                "'{}' is not a member of team '{}' (members: {})",
                member,
                self.team_name,
                self.members.join(", ")
            )))
        }
    }

    /// Owners are either registered members or the `unassigned` sentinel.
    pub fn require_owner(&self, owner: &str) -> Result<()> {
        if owner == UNASSIGNED {
            return Ok(());
        }
        self.require_member(owner)
    }
}

/// Member identifiers: non-empty, no whitespace/control characters or commas,
/// and never one of the reserved sentinels.
pub fn validate_member_id(raw: &str) -> std::result::Result<(), String> {
    if raw.is_empty() {
        return Err("member id must not be empty".to_string());
    }
    if raw.chars().count() > MAX_MEMBER_ID_LEN {
        return Err(format!(
            "member id '{}' exceeds {} characters",
            raw, MAX_MEMBER_ID_LEN
        ));
    }
    if raw
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == ',')
    {
        return Err(format!(
            "member id '{}' contains whitespace, control characters, or commas",
            raw.escape_debug()
        ));
    }
    if raw == UNASSIGNED || raw == BROADCAST_RECIPIENT {
        return Err(format!("member id '{}' is reserved", raw));
    }
    Ok(())
}

pub fn require_valid_member_id(raw: &str) -> Result<()> {
    validate_member_id(raw).map_err(TeamOpsError::InvalidInput)
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validate ids and drop duplicates, keeping first occurrence order.
pub fn normalize_members(members: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(members.len());
    for member in members {
        let member = member.trim();
        require_valid_member_id(member)?;
        if seen.insert(member.to_string()) {
            out.push(member.to_string());
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct InitOutcome {
    pub team: Team,
    /// Previous (complete, partial, or corrupt) state was cleared.
    pub reset: bool,
}

/// Create a team, or with `force` clear and rebuild an existing one.
pub fn init_team(
    store: &Store,
    team: &TeamId,
    goal: &str,
    members: &[String],
    force: bool,
) -> Result<InitOutcome> {
    let goal = goal.trim();
    if goal.is_empty() {
        return Err(TeamOpsError::InvalidInput("goal must not be empty".to_string()));
    }
    let members = normalize_members(members)?;
    if members.is_empty() {
        return Err(TeamOpsError::InvalidInput(
            "members must include at least one member".to_string(),
        ));
    }

    with_team_lock(store, team, || {
        let records = store.records(team);
        match records.load_optional::<Team>() {
            Ok(Some(_)) if !force => {
                return Err(TeamOpsError::Conflict(format!(
                    "team '{}' is already initialized; pass --force to reset it",
                    team
                )));
            }
            Err(err @ TeamOpsError::CorruptState { .. }) if !force => return Err(err),
            Err(err @ TeamOpsError::IoError(_)) => return Err(err),
            _ => {}
        }

        let reset = records.dir().exists();
        if reset {
            fs::remove_dir_all(records.dir()).map_err(TeamOpsError::IoError)?;
        }
        fs::create_dir_all(records.dir()).map_err(TeamOpsError::IoError)?;

        let record = Team {
            team_name: team.to_string(),
            goal: goal.to_string(),
            members,
            created_at: time::now_epoch_z(),
        };
        records.save(&TaskBoard::default())?;
        records.save(&DebateBoard::default())?;
        records.touch_log(MESSAGES_LOG)?;
        // Team record last: its presence marks a complete initialization.
        records.save(&record)?;

        info!(team = %team, members = record.members.len(), reset, "team initialized");
        Monitor::new(store, team, "init")
            .event("team.initialized", "team-ops")
            .entity("team", team.as_str())
            .after(serde_json::json!({ "members": record.members, "goal": record.goal }))
            .metadata(serde_json::json!({ "reset": reset }))
            .emit();

        Ok(InitOutcome {
            team: record,
            reset,
        })
    })
}

/// Load the team record; a missing record means the team was never initialized.
pub fn load_team(store: &Store, team: &TeamId) -> Result<Team> {
    store
        .records(team)
        .load_optional::<Team>()?
        .ok_or_else(|| {
            TeamOpsError::InvalidInput(format!(
                "team '{}' is not initialized. Run: team-ops init --team {} --goal <goal> --members <a,b>",
                team, team
            ))
        })
}

#[derive(clap::Args, Debug)]
pub struct InitCli {
    #[clap(long)]
    pub team: String,
    #[clap(long)]
    pub goal: String,
    /// Comma-separated member ids.
    #[clap(long)]
    pub members: String,
    /// Clear and rebuild existing, partial, or corrupt team state.
    #[clap(long)]
    pub force: bool,
}

pub fn run_init_cli(store: &Store, format: OutputFormat, cli: InitCli) -> Result<()> {
    let team = TeamId::parse(&cli.team)?;
    let outcome = init_team(store, &team, &cli.goal, &split_list(&cli.members), cli.force)?;
    let envelope = time::command_envelope(
        "init",
        "ok",
        serde_json::json!({
            "root": store.root.to_string_lossy(),
            "team": outcome.team,
            "reset": outcome.reset,
        }),
    );
    let verb = if outcome.reset { "reset" } else { "initialized" };
    let line = format!(
        "{} team {} ({} members: {})",
        verb,
        team,
        outcome.team.members.len(),
        outcome.team.members.join(", ")
    );
    print_result(format, &envelope, &[line]);
    Ok(())
}
