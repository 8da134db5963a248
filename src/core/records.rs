//! Durable record store: atomic JSON records and append-only JSONL logs.
//!
//! Structured records (team, task board, debate board) are rewritten whole via
//! temp-file + fsync + rename, so readers only ever observe a complete prior or
//! complete new version. Logs (messages, monitor events) are appended one
//! self-contained JSON line at a time; unparseable lines are skipped on read.
//!
//! Shape validation happens once, here: a record that deserializes but violates
//! [`Record::check`] surfaces as `CorruptState` naming the file and the field.

use crate::core::error::{Result, TeamOpsError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use ulid::Ulid;

const TEMP_SUFFIX: &str = ".tmp";

/// A whole-file JSON record kind.
pub trait Record: Serialize + DeserializeOwned {
    const FILE_NAME: &'static str;

    /// Structural checks serde cannot express. May repair derived fields such as
    /// the next-id counter; returns a description of the first violation.
    fn check(&mut self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Parsed log contents plus the number of lines that failed to parse.
#[derive(Debug, Clone)]
pub struct LogRead<T> {
    pub entries: Vec<T>,
    pub skipped: usize,
}

/// Record access for one team directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of<R: Record>(&self) -> PathBuf {
        self.dir.join(R::FILE_NAME)
    }

    pub fn log_path(&self, log: &str) -> PathBuf {
        self.dir.join(log)
    }

    /// Load a record, returning `R::default()` when the file is missing or empty.
    pub fn load<R: Record + Default>(&self) -> Result<R> {
        Ok(self.load_optional::<R>()?.unwrap_or_default())
    }

    /// Load a record, returning `None` when the file is missing or empty.
    pub fn load_optional<R: Record>(&self) -> Result<Option<R>> {
        let path = self.path_of::<R>();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(TeamOpsError::IoError(err)),
        };
        if content.trim().is_empty() {
            debug!(path = %path.display(), "empty record file treated as missing");
            return Ok(None);
        }
        parse_record::<R>(&path, &content).map(Some)
    }

    /// Atomically replace the record file.
    pub fn save<R: Record>(&self, record: &R) -> Result<()> {
        self.sweep_temp_files();
        self.stage(record)?.commit()
    }

    /// Write the serialized record to a temp file next to its destination,
    /// without publishing it. Dropping the result discards the temp file.
    pub fn stage<R: Record>(&self, record: &R) -> Result<StagedWrite> {
        let body = serde_json::to_vec_pretty(record)?;
        fs::create_dir_all(&self.dir).map_err(TeamOpsError::IoError)?;
        let target = self.path_of::<R>();
        let temp = self.dir.join(format!(
            ".{}.{}.{}{}",
            R::FILE_NAME,
            std::process::id(),
            Ulid::new(),
            TEMP_SUFFIX
        ));
        let staged = StagedWrite {
            temp,
            target,
            done: false,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged.temp)
            .map_err(TeamOpsError::IoError)?;
        file.write_all(&body).map_err(TeamOpsError::IoError)?;
        file.write_all(b"\n").map_err(TeamOpsError::IoError)?;
        file.sync_all().map_err(TeamOpsError::IoError)?;
        drop(file);
        Ok(staged)
    }

    /// Remove leftover temp files from interrupted writes. Best-effort; only
    /// safe while holding the team lock.
    pub fn sweep_temp_files(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(file = %name, error = %err, "failed to remove leftover temp file"),
                }
            }
        }
        if removed > 0 {
            debug!(dir = %self.dir.display(), removed, "swept leftover temp files");
        }
        removed
    }

    /// Append one JSON line to a log. A torn trailing line left by a crashed
    /// writer is terminated first so the new entry stays parseable.
    pub fn append<T: Serialize>(&self, log: &str, entry: &T) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        fs::create_dir_all(&self.dir).map_err(TeamOpsError::IoError)?;
        let path = self.log_path(log);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(TeamOpsError::IoError)?;
        let len = file.metadata().map_err(TeamOpsError::IoError)?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))
                .map_err(TeamOpsError::IoError)?;
            file.read_exact(&mut last).map_err(TeamOpsError::IoError)?;
            if last[0] != b'\n' {
                line.insert(0, '\n');
            }
        }
        file.write_all(line.as_bytes())
            .map_err(TeamOpsError::IoError)?;
        Ok(())
    }

    /// Read every parseable entry of a log. Missing log = empty.
    pub fn read_log<T: DeserializeOwned>(&self, log: &str) -> Result<LogRead<T>> {
        let path = self.log_path(log);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(LogRead {
                    entries: Vec::new(),
                    skipped: 0,
                });
            }
            Err(err) => return Err(TeamOpsError::IoError(err)),
        };
        let mut entries = Vec::new();
        let mut skipped = 0;
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    skipped += 1;
                    warn!(log = %path.display(), line = idx + 1, error = %err, "skipping malformed log line");
                }
            }
        }
        Ok(LogRead { entries, skipped })
    }

    /// Create the log file if it does not exist yet.
    pub fn touch_log(&self, log: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(TeamOpsError::IoError)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(log))
            .map_err(TeamOpsError::IoError)?;
        Ok(())
    }
}

/// A fully written, fsynced temp file awaiting its rename into place.
#[derive(Debug)]
pub struct StagedWrite {
    temp: PathBuf,
    target: PathBuf,
    done: bool,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.temp, &self.target).map_err(TeamOpsError::IoError)?;
        self.done = true;
        if let Some(parent) = self.target.parent() {
            sync_dir(parent);
        }
        debug!(path = %self.target.display(), "record committed");
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.done {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn parse_record<R: Record>(path: &Path, content: &str) -> Result<R> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| TeamOpsError::corrupt(path, format!("invalid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(TeamOpsError::corrupt(
            path,
            format!("root must be a JSON object, found {}", json_type_name(&value)),
        ));
    }
    let mut record: R = serde_json::from_value(value)
        .map_err(|e| TeamOpsError::corrupt(path, e.to_string()))?;
    record
        .check()
        .map_err(|detail| TeamOpsError::corrupt(path, detail))?;
    Ok(record)
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Render a sequential id such as `task-3`.
pub fn format_seq_id(prefix: &str, n: u64) -> String {
    format!("{}-{}", prefix, n)
}

/// Parse `<prefix>-<n>` with `n >= 1`.
pub fn parse_seq_id(prefix: &str, id: &str) -> Option<u64> {
    let digits = id.strip_prefix(prefix)?.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok().filter(|n| *n >= 1)
}

/// Validate every id of a board and return the counter the board should carry:
/// the stored one when it is ahead of all ids, otherwise `max(id) + 1`.
pub fn reconcile_next_id<'a, I>(
    field: &str,
    prefix: &str,
    ids: I,
    stored: Option<u64>,
) -> std::result::Result<u64, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut max_seen = 0u64;
    let mut seen = std::collections::HashSet::new();
    for (idx, id) in ids.into_iter().enumerate() {
        let n = parse_seq_id(prefix, id).ok_or_else(|| {
            format!(
                "{}[{}].id: expected '{}-<n>', found '{}'",
                field, idx, prefix, id
            )
        })?;
        if !seen.insert(n) {
            return Err(format!("{}[{}].id: duplicate id '{}'", field, idx, id));
        }
        max_seen = max_seen.max(n);
    }
    let floor = max_seen + 1;
    Ok(match stored {
        Some(next) if next >= floor => next,
        _ => floor,
    })
}
