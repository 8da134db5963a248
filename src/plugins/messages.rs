//! Team message log (`messages.jsonl`): direct messages and broadcasts.

use crate::core::error::{Result, TeamOpsError};
use crate::core::lock::with_team_lock;
use crate::core::monitor::Monitor;
use crate::core::output::{OutputFormat, compact_line, print_result};
use crate::core::records::RecordStore;
use crate::core::store::{Store, TeamId};
use crate::core::time;
use crate::plugins::team::{BROADCAST_RECIPIENT, Team, load_team, require_valid_member_id};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MESSAGES_LOG: &str = "messages.jsonl";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Direct,
    Broadcast,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub at: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub from: String,
    pub to: String,
    pub body: String,
}

impl Message {
    pub fn is_for(&self, member: &str) -> bool {
        match self.kind {
            MessageKind::Broadcast => true,
            MessageKind::Direct => self.to == member,
        }
    }
}

fn require_body(body: &str) -> Result<&str> {
    let body = body.trim();
    if body.is_empty() {
        return Err(TeamOpsError::InvalidInput(
            "message body must not be empty".to_string(),
        ));
    }
    Ok(body)
}

/// Append a direct message. Caller holds the team lock.
pub(crate) fn append_direct(
    records: &RecordStore,
    team: &Team,
    from: &str,
    to: &str,
    body: &str,
) -> Result<Message> {
    require_valid_member_id(from)?;
    team.require_member(to)?;
    let message = Message {
        at: time::now_epoch_z(),
        kind: MessageKind::Direct,
        from: from.to_string(),
        to: to.to_string(),
        body: require_body(body)?.to_string(),
    };
    records.append(MESSAGES_LOG, &message)?;
    debug!(from, to, "direct message appended");
    Ok(message)
}

/// Build a validated broadcast without writing it.
pub(crate) fn broadcast_message(from: &str, body: &str) -> Result<Message> {
    require_valid_member_id(from)?;
    Ok(Message {
        at: time::now_epoch_z(),
        kind: MessageKind::Broadcast,
        from: from.to_string(),
        to: BROADCAST_RECIPIENT.to_string(),
        body: require_body(body)?.to_string(),
    })
}

/// Append an already validated message. Caller holds the team lock.
pub(crate) fn append_message(records: &RecordStore, message: &Message) -> Result<()> {
    records.append(MESSAGES_LOG, message)?;
    debug!(from = %message.from, to = %message.to, "message appended");
    Ok(())
}

pub fn send_message(
    store: &Store,
    team: &TeamId,
    from: &str,
    to: &str,
    body: &str,
) -> Result<Message> {
    with_team_lock(store, team, || {
        let team_rec = load_team(store, team)?;
        let message = append_direct(&store.records(team), &team_rec, from, to, body)?;
        Monitor::new(store, team, "message.send")
            .event("message.sent", from)
            .entity("member", to)
            .metadata(serde_json::json!({ "type": message.kind }))
            .emit();
        Ok(message)
    })
}

pub fn broadcast(store: &Store, team: &TeamId, from: &str, body: &str) -> Result<Message> {
    with_team_lock(store, team, || {
        load_team(store, team)?;
        let message = broadcast_message(from, body)?;
        append_message(&store.records(team), &message)?;
        Monitor::new(store, team, "message.broadcast")
            .event("message.sent", from)
            .entity("member", BROADCAST_RECIPIENT)
            .metadata(serde_json::json!({ "type": message.kind }))
            .emit();
        Ok(message)
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Inbox {
    pub member: String,
    pub messages: Vec<Message>,
    pub skipped: usize,
}

/// Direct messages to `member` plus all broadcasts, in log order. Lock-free.
pub fn inbox(store: &Store, team: &TeamId, member: &str) -> Result<Inbox> {
    let team_rec = load_team(store, team)?;
    team_rec.require_member(member)?;
    let log = store.records(team).read_log::<Message>(MESSAGES_LOG)?;
    Ok(Inbox {
        member: member.to_string(),
        messages: log.entries.into_iter().filter(|m| m.is_for(member)).collect(),
        skipped: log.skipped,
    })
}

fn message_line(message: &Message) -> String {
    format!(
        "{} {} -> {}: {}",
        message.at,
        message.from,
        message.to,
        compact_line(&message.body, 120)
    )
}

#[derive(clap::Args, Debug)]
pub struct MessageCli {
    #[clap(subcommand)]
    pub command: MessageCommand,
}

#[derive(Subcommand, Debug)]
pub enum MessageCommand {
    /// Send a direct message to one member.
    Send {
        #[clap(long)]
        team: String,
        #[clap(long)]
        from: String,
        #[clap(long)]
        to: String,
        #[clap(long)]
        body: String,
    },
    /// Send a message to every member.
    Broadcast {
        #[clap(long)]
        team: String,
        #[clap(long)]
        from: String,
        #[clap(long)]
        body: String,
    },
    /// Read direct messages and broadcasts for a member.
    Inbox {
        #[clap(long)]
        team: String,
        #[clap(long)]
        member: String,
    },
}

pub fn run_message_cli(store: &Store, format: OutputFormat, cli: MessageCli) -> Result<()> {
    match cli.command {
        MessageCommand::Send {
            team,
            from,
            to,
            body,
        } => {
            let team = TeamId::parse(&team)?;
            let message = send_message(store, &team, &from, &to, &body)?;
            let envelope = time::command_envelope(
                "message.send",
                "ok",
                serde_json::json!({ "team": team.as_str(), "message": message }),
            );
            print_result(format, &envelope, &[format!("sent {}", message_line(&message))]);
        }
        MessageCommand::Broadcast { team, from, body } => {
            let team = TeamId::parse(&team)?;
            let message = broadcast(store, &team, &from, &body)?;
            let envelope = time::command_envelope(
                "message.broadcast",
                "ok",
                serde_json::json!({ "team": team.as_str(), "message": message }),
            );
            print_result(format, &envelope, &[format!("sent {}", message_line(&message))]);
        }
        MessageCommand::Inbox { team, member } => {
            let team = TeamId::parse(&team)?;
            let inbox = inbox(store, &team, &member)?;
            let mut lines: Vec<String> = inbox.messages.iter().map(message_line).collect();
            if lines.is_empty() {
                lines.push(format!("no messages for {}", member));
            }
            if inbox.skipped > 0 {
                lines.push(format!("({} malformed lines skipped)", inbox.skipped));
            }
            let envelope = time::command_envelope(
                "message.inbox",
                "ok",
                serde_json::json!({
                    "team": team.as_str(),
                    "member": inbox.member,
                    "messages": inbox.messages,
                    "skipped": inbox.skipped,
                }),
            );
            print_result(format, &envelope, &lines);
        }
    }
    Ok(())
}
