//! Task board: shared tasks with owners, statuses, and advisory dependencies.
//!
//! Board transitions are plain methods on [`TaskBoard`]; the `*_task`
//! functions wrap them in the team lock, persist the board, and emit monitor
//! events with before/after snapshots.

use crate::core::config::resolve_actor;
use crate::core::error::{Result, TeamOpsError};
use crate::core::lock::with_team_lock;
use crate::core::monitor::Monitor;
use crate::core::output::{OutputFormat, compact_line, joined_or_dash, print_result};
use crate::core::records::{Record, format_seq_id, reconcile_next_id};
use crate::core::store::{Store, TeamId};
use crate::core::time;
use crate::plugins::team::{Team, UNASSIGNED, load_team, split_list};
use clap::{Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use tracing::info;

pub const TASKS_FILE: &str = "tasks.json";
pub const TASK_ID_PREFIX: &str = "task";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskNote {
    pub at: String,
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub notes: Vec<TaskNote>,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    /// The fields audit events track across a mutation.
    pub fn snapshot(&self) -> JsonValue {
        serde_json::json!({
            "owner": self.owner,
            "status": self.status,
            "depends_on": self.depends_on,
            "note_count": self.notes.len(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskBoard {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub next_id: u64,
}

impl Default for TaskBoard {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
        }
    }
}

impl Record for TaskBoard {
    const FILE_NAME: &'static str = TASKS_FILE;

    fn check(&mut self) -> std::result::Result<(), String> {
        self.next_id = reconcile_next_id(
            "tasks",
            TASK_ID_PREFIX,
            self.tasks.iter().map(|t| t.id.as_str()),
            Some(self.next_id),
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub owner: String,
    pub status: TaskStatus,
    pub depends_on: Vec<String>,
}

impl NewTask {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            owner: UNASSIGNED.to_string(),
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub owner: Option<String>,
    pub depends_on: Option<Vec<String>>,
    pub note: Option<String>,
}

fn normalize_deps(deps: &[String]) -> Vec<String> {
    deps.iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

impl TaskBoard {
    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TeamOpsError::InvalidInput(format!("task not found: {}", id)))
    }

    pub fn append(&mut self, team: &Team, new: NewTask, now: &str) -> Result<&Task> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(TeamOpsError::InvalidInput("task title must not be empty".to_string()));
        }
        team.require_owner(&new.owner)?;
        let id = format_seq_id(TASK_ID_PREFIX, self.next_id);
        self.tasks.push(Task {
            id,
            title: title.to_string(),
            owner: new.owner,
            status: new.status,
            depends_on: normalize_deps(&new.depends_on),
            notes: Vec::new(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        });
        self.next_id += 1;
        Ok(&self.tasks[self.tasks.len() - 1])
    }

    pub fn claim(&mut self, team: &Team, id: &str, member: &str, now: &str) -> Result<&Task> {
        team.require_member(member)?;
        let task = self.find_mut(id)?;
        if task.status == TaskStatus::Completed {
            return Err(TeamOpsError::Conflict(format!(
                "cannot claim completed task: {}",
                id
            )));
        }
        task.owner = member.to_string();
        task.status = TaskStatus::InProgress;
        task.updated_at = now.to_string();
        Ok(task)
    }

    pub fn update(
        &mut self,
        team: &Team,
        id: &str,
        update: &TaskUpdate,
        now: &str,
    ) -> Result<&Task> {
        if let Some(owner) = &update.owner {
            team.require_owner(owner)?;
        }
        let task = self.find_mut(id)?;
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(owner) = &update.owner {
            task.owner = owner.clone();
        }
        if let Some(deps) = &update.depends_on {
            task.depends_on = normalize_deps(deps);
        }
        if let Some(note) = update.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            task.notes.push(TaskNote {
                at: now.to_string(),
                text: note.to_string(),
            });
        }
        task.updated_at = now.to_string();
        Ok(task)
    }
}

pub fn add_task(store: &Store, team: &TeamId, new: NewTask, actor: &str) -> Result<Task> {
    with_team_lock(store, team, || {
        let team_rec = load_team(store, team)?;
        let records = store.records(team);
        let mut board = records.load::<TaskBoard>()?;
        let task = board.append(&team_rec, new, &time::now_epoch_z())?.clone();
        records.save(&board)?;

        info!(team = %team, task = %task.id, "task added");
        Monitor::new(store, team, "task.add")
            .event("task.added", actor)
            .entity("task", &task.id)
            .after(task.snapshot())
            .metadata(serde_json::json!({ "title": task.title }))
            .emit();
        Ok(task)
    })
}

pub fn claim_task(store: &Store, team: &TeamId, task_id: &str, member: &str) -> Result<Task> {
    with_team_lock(store, team, || {
        let team_rec = load_team(store, team)?;
        let records = store.records(team);
        let mut board = records.load::<TaskBoard>()?;
        let before = board.find(task_id).map(Task::snapshot);
        let task = board
            .claim(&team_rec, task_id, member, &time::now_epoch_z())?
            .clone();
        records.save(&board)?;

        info!(team = %team, task = %task.id, member, "task claimed");
        let monitor = Monitor::new(store, team, "task.claim");
        let mut event = monitor
            .event("task.claimed", member)
            .entity("task", &task.id)
            .after(task.snapshot());
        if let Some(before) = before {
            event = event.before(before);
        }
        event.emit();
        Ok(task)
    })
}

pub fn update_task(
    store: &Store,
    team: &TeamId,
    task_id: &str,
    update: &TaskUpdate,
    actor: &str,
) -> Result<Task> {
    with_team_lock(store, team, || {
        let team_rec = load_team(store, team)?;
        let records = store.records(team);
        let mut board = records.load::<TaskBoard>()?;
        let before = board.find(task_id).map(Task::snapshot);
        let task = board
            .update(&team_rec, task_id, update, &time::now_epoch_z())?
            .clone();
        records.save(&board)?;

        info!(team = %team, task = %task.id, "task updated");
        let monitor = Monitor::new(store, team, "task.update");
        let mut event = monitor
            .event("task.updated", actor)
            .entity("task", &task.id)
            .after(task.snapshot());
        if let Some(before) = before {
            event = event.before(before);
        }
        event.emit();
        Ok(task)
    })
}

/// Lock-free read; may be stale by the time the caller acts on it.
pub fn list_tasks(store: &Store, team: &TeamId, status: Option<TaskStatus>) -> Result<Vec<Task>> {
    load_team(store, team)?;
    let board = store.records(team).load::<TaskBoard>()?;
    Ok(board
        .tasks
        .into_iter()
        .filter(|t| status.is_none_or(|s| t.status == s))
        .collect())
}

pub fn get_task(store: &Store, team: &TeamId, task_id: &str) -> Result<Option<Task>> {
    load_team(store, team)?;
    let board = store.records(team).load::<TaskBoard>()?;
    Ok(board.find(task_id).cloned())
}

fn task_line(task: &Task) -> String {
    format!(
        "{} [{}] owner={} deps={} {}",
        task.id,
        task.status,
        task.owner,
        joined_or_dash(&task.depends_on),
        compact_line(&task.title, 80)
    )
}

#[derive(clap::Args, Debug)]
pub struct TaskCli {
    #[clap(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Append a task to the team board.
    Add {
        #[clap(long)]
        team: String,
        #[clap(long)]
        title: String,
        #[clap(long, default_value = UNASSIGNED)]
        owner: String,
        #[clap(long, value_enum, default_value_t = TaskStatus::Pending)]
        status: TaskStatus,
        /// Comma-separated task ids (advisory).
        #[clap(long, default_value = "")]
        depends_on: String,
        #[clap(long)]
        by: Option<String>,
    },
    /// Take ownership of a task and mark it in progress.
    Claim {
        #[clap(long)]
        team: String,
        #[clap(long)]
        id: String,
        #[clap(long)]
        member: String,
    },
    /// Change status, owner, or dependencies, or append a note.
    Update {
        #[clap(long)]
        team: String,
        #[clap(long)]
        id: String,
        #[clap(long, value_enum)]
        status: Option<TaskStatus>,
        #[clap(long)]
        owner: Option<String>,
        /// Replaces the dependency list; pass "" to clear it.
        #[clap(long)]
        depends_on: Option<String>,
        #[clap(long)]
        note: Option<String>,
        #[clap(long)]
        by: Option<String>,
    },
    /// List tasks, optionally filtered by status.
    List {
        #[clap(long)]
        team: String,
        #[clap(long, value_enum)]
        status: Option<TaskStatus>,
    },
    /// Show one task with its notes.
    Show {
        #[clap(long)]
        team: String,
        #[clap(long)]
        id: String,
    },
}

pub fn run_task_cli(store: &Store, format: OutputFormat, cli: TaskCli) -> Result<()> {
    match cli.command {
        TaskCommand::Add {
            team,
            title,
            owner,
            status,
            depends_on,
            by,
        } => {
            let team = TeamId::parse(&team)?;
            let new = NewTask {
                title,
                owner,
                status,
                depends_on: split_list(&depends_on),
            };
            let task = add_task(store, &team, new, &resolve_actor(by.as_deref()))?;
            let envelope = time::command_envelope(
                "task.add",
                "ok",
                serde_json::json!({ "team": team.as_str(), "task": task }),
            );
            print_result(format, &envelope, &[format!("added {}", task_line(&task))]);
        }
        TaskCommand::Claim { team, id, member } => {
            let team = TeamId::parse(&team)?;
            let task = claim_task(store, &team, &id, &member)?;
            let envelope = time::command_envelope(
                "task.claim",
                "ok",
                serde_json::json!({ "team": team.as_str(), "task": task }),
            );
            print_result(format, &envelope, &[format!("claimed {}", task_line(&task))]);
        }
        TaskCommand::Update {
            team,
            id,
            status,
            owner,
            depends_on,
            note,
            by,
        } => {
            let team = TeamId::parse(&team)?;
            let update = TaskUpdate {
                status,
                owner,
                depends_on: depends_on.as_deref().map(split_list),
                note,
            };
            let task = update_task(store, &team, &id, &update, &resolve_actor(by.as_deref()))?;
            let envelope = time::command_envelope(
                "task.update",
                "ok",
                serde_json::json!({ "team": team.as_str(), "task": task }),
            );
            print_result(format, &envelope, &[format!("updated {}", task_line(&task))]);
        }
        TaskCommand::List { team, status } => {
            let team = TeamId::parse(&team)?;
            let tasks = list_tasks(store, &team, status)?;
            let mut lines: Vec<String> = tasks.iter().map(task_line).collect();
            if lines.is_empty() {
                lines.push("no tasks".to_string());
            }
            let envelope = time::command_envelope(
                "task.list",
                "ok",
                serde_json::json!({ "team": team.as_str(), "tasks": tasks }),
            );
            print_result(format, &envelope, &lines);
        }
        TaskCommand::Show { team, id } => {
            let team = TeamId::parse(&team)?;
            let task = get_task(store, &team, &id)?
                .ok_or_else(|| TeamOpsError::InvalidInput(format!("task not found: {}", id)))?;
            let mut lines = vec![task_line(&task)];
            lines.extend(
                task.notes
                    .iter()
                    .map(|n| format!("  {} {}", n.at, compact_line(&n.text, 100))),
            );
            let envelope = time::command_envelope(
                "task.show",
                "ok",
                serde_json::json!({ "team": team.as_str(), "task": task }),
            );
            print_result(format, &envelope, &lines);
        }
    }
    Ok(())
}
