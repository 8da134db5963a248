//! Audit/monitor event log (`monitor.jsonl`).
//!
//! Purely observational: nothing in team-ops reads these events back. A failed
//! append is logged and swallowed so it can never undo a committed mutation.

use crate::core::records::{LogRead, RecordStore};
use crate::core::error::Result;
use crate::core::store::{Store, TeamId};
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

pub const MONITOR_LOG: &str = "monitor.jsonl";
pub const CORRELATION_ENV: &str = "TEAM_OPS_CORRELATION_ID";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MonitorEvent {
    pub ts: String,
    pub event_id: String,
    pub event_type: String,
    pub command: String,
    pub team: String,
    pub actor: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<JsonValue>,
    #[serde(default)]
    pub metadata: JsonValue,
    pub correlation_id: String,
}

/// Event sink for one logical operation. All events share a correlation id.
#[derive(Debug, Clone)]
pub struct Monitor {
    enabled: bool,
    records: RecordStore,
    team: String,
    command: String,
    correlation_id: String,
}

impl Monitor {
    pub fn new(store: &Store, team: &TeamId, command: &str) -> Self {
        let correlation_id = std::env::var(CORRELATION_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(time::new_event_id);
        Self {
            enabled: store.config.monitor.enabled,
            records: store.records(team),
            team: team.to_string(),
            command: command.to_string(),
            correlation_id,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn event<'a>(&'a self, event_type: &str, actor: &str) -> EventDraft<'a> {
        EventDraft {
            monitor: self,
            event: MonitorEvent {
                ts: time::now_epoch_z(),
                event_id: time::new_event_id(),
                event_type: event_type.to_string(),
                command: self.command.clone(),
                team: self.team.clone(),
                actor: actor.to_string(),
                entity_type: None,
                entity_id: None,
                before: None,
                after: None,
                metadata: JsonValue::Object(Default::default()),
                correlation_id: self.correlation_id.clone(),
            },
        }
    }

    fn write(&self, event: &MonitorEvent) {
        if !self.enabled {
            return;
        }
        if let Err(err) = self.records.append(MONITOR_LOG, event) {
            warn!(event_type = %event.event_type, error = %err, "failed to append monitor event");
        }
    }
}

pub struct EventDraft<'a> {
    monitor: &'a Monitor,
    event: MonitorEvent,
}

impl EventDraft<'_> {
    pub fn entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.event.entity_type = Some(entity_type.to_string());
        self.event.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn before(mut self, snapshot: JsonValue) -> Self {
        self.event.before = Some(snapshot);
        self
    }

    pub fn after(mut self, snapshot: JsonValue) -> Self {
        self.event.after = Some(snapshot);
        self
    }

    pub fn metadata(mut self, metadata: JsonValue) -> Self {
        self.event.metadata = metadata;
        self
    }

    pub fn emit(self) {
        self.monitor.write(&self.event);
    }
}

/// Read the monitor log for a team (for reporting tools and tests).
pub fn read_events(store: &Store, team: &TeamId) -> Result<LogRead<MonitorEvent>> {
    store.records(team).read_log(MONITOR_LOG)
}
