//! team-ops: file-backed coordination for small agent teams.
//!
//! A team shares a task board, a message log, and a debate board, all stored
//! as plain files under a discoverable `.team-ops/` root. Any number of
//! independent processes may operate on the same team: every mutation runs
//! under a per-team advisory lock and rewrites records atomically.
//!
//! # Architecture
//!
//! ## The transaction boundary
//!
//! Every mutating operation follows the same shape:
//! acquire lock -> load records -> pure transition -> atomic save -> monitor
//! event -> release lock. Reads skip the lock and rely on atomic renames to
//! never observe a torn file.
//!
//! ## Subsystems (Plugins)
//!
//! - `team`: team record and membership
//! - `tasks`: task board (append, claim, update)
//! - `messages`: direct and broadcast messages
//! - `debate`: weighted positions, deterministic scoring, idempotent apply
//! - `orchestrate`: one-step driver that moves a debate toward `applied`
//!
//! # Examples
//!
//! ```bash
//! team-ops init --team core --goal "ship v1" --members ann,bo,cy
//! team-ops task add --team core --title "pick a database"
//! team-ops debate start --team core --topic db --options pg,sqlite --members ann,bo --task task-1
//! team-ops debate position --team core --id debate-1 --member ann --option pg --confidence 0.8
//! team-ops debate orchestrate --team core --id debate-1 --remind
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store layout, record store, lock manager, monitor log, config
//! - [`plugins`]: subsystem implementations

pub mod core;
pub mod plugins;

use crate::core::{error::Result, output::OutputFormat, store::Store};
use crate::plugins::{debate, messages, tasks, team};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(
    name = "team-ops",
    version = env!("CARGO_PKG_VERSION"),
    about = "Shared task board, messages, and debates for agent teams"
)]
pub struct Cli {
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a team (or reset one with --force)
    #[clap(name = "init", visible_alias = "i")]
    Init(team::InitCli),

    /// Track tasks on the team board
    #[clap(name = "task", visible_alias = "t")]
    Task(tasks::TaskCli),

    /// Send and read team messages
    #[clap(name = "message", visible_alias = "m")]
    Message(messages::MessageCli),

    /// Run structured decisions
    #[clap(name = "debate", visible_alias = "d")]
    Debate(debate::DebateCli),
}

/// Execute a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let current_dir = std::env::current_dir()?;
    let format = cli.format;
    match cli.command {
        Command::Init(args) => {
            let store = Store::discover_or_create(&current_dir)?;
            team::run_init_cli(&store, format, args)
        }
        Command::Task(args) => tasks::run_task_cli(&Store::discover(&current_dir)?, format, args),
        Command::Message(args) => {
            messages::run_message_cli(&Store::discover(&current_dir)?, format, args)
        }
        Command::Debate(args) => {
            debate::run_debate_cli(&Store::discover(&current_dir)?, format, args)
        }
    }
}
