use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TeamOpsError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Corrupt state in {}: {detail}", path.display())]
    CorruptState { path: PathBuf, detail: String },
    #[error("Timed out after {waited_ms}ms waiting for the lock on team '{team}'; retry later")]
    LockTimeout { team: String, waited_ms: u64 },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializeError(String),
}

impl TeamOpsError {
    pub fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::CorruptState {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Only lock contention is worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => 2,
            Self::Conflict(_) => 3,
            Self::CorruptState { .. } => 4,
            Self::LockTimeout { .. } => 75,
            Self::IoError(_) | Self::SerializeError(_) => 1,
        }
    }

    /// Short machine-readable tag used in JSON error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::CorruptState { .. } => "corrupt_state",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Conflict(_) => "conflict",
            Self::IoError(_) => "io",
            Self::SerializeError(_) => "serialize",
        }
    }
}

impl From<serde_json::Error> for TeamOpsError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializeError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TeamOpsError>;
