//! Store abstraction for team-ops state.
//!
//! A `Store` is the discovered storage root (`.team-ops/`) plus its loaded
//! configuration. Every operation receives the store and a validated [`TeamId`]
//! explicitly; nothing here is process-global.

use crate::core::config::TeamOpsConfig;
use crate::core::error::{Result, TeamOpsError};
use crate::core::records::RecordStore;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const ROOT_DIR_NAME: &str = ".team-ops";
pub const ROOT_ENV: &str = "TEAM_OPS_ROOT";

const TEAMS_DIR: &str = "teams";
const LOCKS_DIR: &str = "locks";
const MAX_TEAM_ID_LEN: usize = 64;

/// Validated, path-safe team identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TeamId(String);

impl TeamId {
    pub fn parse(raw: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static team id pattern")
        });
        if raw.len() > MAX_TEAM_ID_LEN || !pattern.is_match(raw) {
            return Err(TeamOpsError::InvalidInput(format!(
                "team name '{}' must match [A-Za-z0-9][A-Za-z0-9._-]* (max {} chars)",
                raw.escape_debug(),
                MAX_TEAM_ID_LEN
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store handle representing one team-ops state root.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the `.team-ops` directory.
    pub root: PathBuf,
    pub config: TeamOpsConfig,
}

impl Store {
    /// Open a root, loading `config.toml` and environment overrides.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = TeamOpsConfig::load(&root)?;
        Ok(Self { root, config })
    }

    pub fn with_config(root: impl Into<PathBuf>, config: TeamOpsConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// `TEAM_OPS_ROOT` wins; otherwise walk up from `start_dir` looking for `.team-ops/`.
    pub fn discover(start_dir: &Path) -> Result<Self> {
        if let Ok(explicit) = std::env::var(ROOT_ENV) {
            if !explicit.trim().is_empty() {
                return Self::open(PathBuf::from(explicit));
            }
        }
        match find_root(start_dir) {
            Some(root) => Self::open(root),
            None => Err(TeamOpsError::InvalidInput(format!(
                "'{}' directory not found in {} or its parents. Run `team-ops init` first.",
                ROOT_DIR_NAME,
                start_dir.display()
            ))),
        }
    }

    /// Like [`Store::discover`], but falls back to `<start_dir>/.team-ops` for `init`.
    pub fn discover_or_create(start_dir: &Path) -> Result<Self> {
        match Self::discover(start_dir) {
            Ok(store) => Ok(store),
            Err(TeamOpsError::InvalidInput(_)) => Self::open(start_dir.join(ROOT_DIR_NAME)),
            Err(e) => Err(e),
        }
    }

    pub fn team_dir(&self, team: &TeamId) -> PathBuf {
        self.root.join(TEAMS_DIR).join(team.as_str())
    }

    pub fn lock_path(&self, team: &TeamId) -> PathBuf {
        self.root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", team.as_str()))
    }

    pub fn records(&self, team: &TeamId) -> RecordStore {
        RecordStore::new(self.team_dir(team))
    }
}

fn find_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = PathBuf::from(start_dir);
    loop {
        let candidate = current.join(ROOT_DIR_NAME);
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}
