//! Runtime configuration: `<root>/config.toml` plus `TEAM_OPS_*` overrides.

use crate::core::error::{Result, TeamOpsError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.toml";

const LOCK_WAIT_ENV: &str = "TEAM_OPS_LOCK_WAIT_MS";
const LOCK_STALE_ENV: &str = "TEAM_OPS_LOCK_STALE_SECS";
const MONITOR_ENV: &str = "TEAM_OPS_MONITOR";
pub const ACTOR_ENV: &str = "TEAM_OPS_ACTOR";
/// Actor recorded when neither `--by` nor `TEAM_OPS_ACTOR` is given.
pub const DEFAULT_ACTOR: &str = "team-ops";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Total time to keep retrying a contended lock before `LockTimeout`.
    pub wait_ms: u64,
    /// Fixed backoff between acquisition attempts.
    pub retry_ms: u64,
    /// Markers older than this are candidates for reclaim.
    pub stale_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            wait_ms: 15_000,
            retry_ms: 50,
            stale_secs: 300,
        }
    }
}

impl LockSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamOpsConfig {
    pub lock: LockSettings,
    pub monitor: MonitorSettings,
}

impl TeamOpsConfig {
    /// Load `<root>/config.toml` and apply process environment overrides.
    /// No config file = defaults (not an error).
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = Self::from_file(root)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(TeamOpsError::IoError)?;
        toml::from_str(&content).map_err(|e| {
            TeamOpsError::InvalidInput(format!("{}: {}", path.display(), e))
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(LOCK_WAIT_ENV) {
            self.lock.wait_ms = parse_u64(LOCK_WAIT_ENV, &raw)?;
        }
        if let Some(raw) = lookup(LOCK_STALE_ENV) {
            self.lock.stale_secs = parse_u64(LOCK_STALE_ENV, &raw)?;
        }
        if let Some(raw) = lookup(MONITOR_ENV) {
            self.monitor.enabled = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }
}

/// `explicit`, else `TEAM_OPS_ACTOR`, else [`DEFAULT_ACTOR`].
pub fn resolve_actor(explicit: Option<&str>) -> String {
    resolve_actor_with(explicit, |key| std::env::var(key).ok())
}

pub fn resolve_actor_with<F>(explicit: Option<&str>, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .or_else(|| lookup(ACTOR_ENV).filter(|a| !a.trim().is_empty()))
        .map(|a| a.trim().to_string())
        .unwrap_or_else(|| DEFAULT_ACTOR.to_string())
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| TeamOpsError::InvalidInput(format!("{} must be an integer, got '{}'", key, raw)))
}
