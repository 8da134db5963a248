//! Cross-process advisory lock, one per team.
//!
//! Acquisition creates `<root>/locks/<team>.lock` with `create_new`, which gives
//! single-winner semantics per path. The marker body records the owner's pid,
//! acquisition time, and a random token. Contended acquisition spins with a
//! fixed backoff until the wait budget runs out.
//!
//! A marker is reclaimed only when it is older than the staleness threshold
//! *and* its owner is confirmed dead. Right before deleting, the marker is
//! re-read and its file identity compared against what the staleness check
//! saw, so a marker that a third process created in between is left alone.
//!
//! Time and process liveness are injected through [`Clock`] and
//! [`ProcessProbe`] so the reclaim policy can be exercised without real
//! processes.

use crate::core::config::LockSettings;
use crate::core::error::{Result, TeamOpsError};
use crate::core::store::{Store, TeamId};
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use ulid::Ulid;

pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep(&self, duration: Duration);

    fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The probe could not tell (e.g. permission denied). Treated as alive.
    Unknown,
}

pub trait ProcessProbe {
    fn liveness(&self, pid: u32) -> Liveness;
}

/// Probes with signal 0, which checks existence without delivering anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessProbe;

impl ProcessProbe for OsProcessProbe {
    #[cfg(unix)]
    fn liveness(&self, pid: u32) -> Liveness {
        // pid 0 and negative pids address process groups, never a single owner.
        if pid == 0 || pid > i32::MAX as u32 {
            return Liveness::Dead;
        }
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if rc == 0 {
            return Liveness::Alive;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(code) if code == libc::ESRCH => Liveness::Dead,
            _ => Liveness::Unknown,
        }
    }

    #[cfg(not(unix))]
    fn liveness(&self, _pid: u32) -> Liveness {
        Liveness::Unknown
    }
}

/// Contents of a lock marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub pid: u32,
    pub acquired_at: String,
    pub token: String,
}

/// Filesystem identity of a marker, used to detect replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
    len: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            len: meta.len(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &fs::Metadata) -> Self {
        let modified = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self {
            dev: 0,
            ino: modified,
            len: meta.len(),
        }
    }
}

/// What a staleness check observed about the current marker.
#[derive(Debug, Clone)]
pub struct MarkerSnapshot {
    /// `None` when the marker body is empty or unparseable.
    pub marker: Option<LockMarker>,
    pub identity: FileIdentity,
    pub age_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleVerdict {
    /// Younger than the staleness threshold.
    Fresh,
    /// Old, but the owner is (or may be) still running.
    OwnerAlive,
    /// Old and the owner is gone (or unrecorded); safe to reclaim.
    Reclaimable,
}

pub struct ProcessLock<C = SystemClock, P = OsProcessProbe> {
    team: String,
    path: PathBuf,
    settings: LockSettings,
    clock: C,
    probe: P,
}

impl ProcessLock {
    pub fn new(team: &str, path: impl Into<PathBuf>, settings: LockSettings) -> Self {
        Self::with_parts(team, path, settings, SystemClock, OsProcessProbe)
    }

    pub fn for_team(store: &Store, team: &TeamId) -> Self {
        Self::new(team.as_str(), store.lock_path(team), store.config.lock.clone())
    }
}

impl<C: Clock, P: ProcessProbe> ProcessLock<C, P> {
    pub fn with_parts(
        team: &str,
        path: impl Into<PathBuf>,
        settings: LockSettings,
        clock: C,
        probe: P,
    ) -> Self {
        Self {
            team: team.to_string(),
            path: path.into(),
            settings,
            clock,
            probe,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block (bounded by the wait budget) until the lock is ours.
    pub fn acquire(&self) -> Result<LockGuard> {
        let started = self.clock.now_ms();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if let Some(guard) = self.try_acquire()? {
                debug!(team = %self.team, attempts, "lock acquired");
                return Ok(guard);
            }
            let reclaimed = self.reclaim_if_stale()?;
            let waited_ms = self.clock.now_ms().saturating_sub(started);
            if waited_ms >= self.settings.wait_ms {
                warn!(team = %self.team, waited_ms, attempts, "lock wait budget exhausted");
                return Err(TeamOpsError::LockTimeout {
                    team: self.team.clone(),
                    waited_ms,
                });
            }
            if !reclaimed {
                self.clock.sleep(self.settings.backoff());
            }
        }
    }

    /// Single attempt; `None` when someone else holds the marker.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        self.try_acquire_with(|file, body| {
            file.write_all(body)?;
            file.sync_all()
        })
    }

    /// A marker whose body never made it to disk is removed before the error
    /// is returned; an empty marker would otherwise block the team until it
    /// turned stale.
    fn try_acquire_with<W>(&self, write_body: W) -> Result<Option<LockGuard>>
    where
        W: FnOnce(&mut fs::File, &[u8]) -> std::io::Result<()>,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(TeamOpsError::IoError)?;
        }
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(TeamOpsError::IoError(err)),
        };
        let marker = LockMarker {
            pid: std::process::id(),
            acquired_at: time::epoch_z(self.clock.now_secs()),
            token: Ulid::new().to_string(),
        };
        let written = serde_json::to_vec(&marker)
            .map_err(TeamOpsError::from)
            .and_then(|body| write_body(&mut file, &body).map_err(TeamOpsError::IoError));
        if let Err(err) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %cleanup, "failed to remove unwritten lock marker");
            }
            return Err(err);
        }
        Ok(Some(LockGuard {
            path: self.path.clone(),
            token: marker.token,
            released: false,
        }))
    }

    /// Observe the current marker, if any.
    pub fn inspect(&self) -> Result<Option<MarkerSnapshot>> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(TeamOpsError::IoError(err)),
        };
        let marker = match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice::<LockMarker>(&bytes).ok(),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(TeamOpsError::IoError(err)),
        };
        let acquired_secs = marker
            .as_ref()
            .and_then(|m| time::parse_epoch_z(&m.acquired_at))
            .or_else(|| {
                meta.modified()
                    .ok()
                    .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
            })
            .unwrap_or_else(|| self.clock.now_secs());
        Ok(Some(MarkerSnapshot {
            marker,
            identity: FileIdentity::of(&meta),
            age_secs: self.clock.now_secs().saturating_sub(acquired_secs),
        }))
    }

    pub fn verdict(&self, snapshot: &MarkerSnapshot) -> StaleVerdict {
        if snapshot.age_secs <= self.settings.stale_secs {
            return StaleVerdict::Fresh;
        }
        match &snapshot.marker {
            // Nobody recorded as owner: an owner writes its marker right after
            // creating it, so an old unreadable marker has no live writer.
            None => StaleVerdict::Reclaimable,
            Some(marker) => match self.probe.liveness(marker.pid) {
                Liveness::Dead => StaleVerdict::Reclaimable,
                Liveness::Alive | Liveness::Unknown => StaleVerdict::OwnerAlive,
            },
        }
    }

    /// True when a marker exists and is not reclaimable.
    pub fn held_by_live_owner(&self) -> Result<bool> {
        Ok(match self.inspect()? {
            Some(snapshot) => self.verdict(&snapshot) != StaleVerdict::Reclaimable,
            None => false,
        })
    }

    /// Remove the current marker if it is reclaimable. Returns true when the
    /// caller should retry acquisition immediately.
    pub fn reclaim_if_stale(&self) -> Result<bool> {
        let Some(snapshot) = self.inspect()? else {
            return Ok(true);
        };
        if self.verdict(&snapshot) != StaleVerdict::Reclaimable {
            return Ok(false);
        }
        let removed = self.remove_if_unchanged(&snapshot)?;
        if removed {
            info!(
                team = %self.team,
                age_secs = snapshot.age_secs,
                owner_pid = snapshot.marker.as_ref().map(|m| m.pid),
                "reclaimed stale lock"
            );
        }
        Ok(removed)
    }

    /// Delete the marker only if it is still the exact file `snapshot` saw.
    pub fn remove_if_unchanged(&self, snapshot: &MarkerSnapshot) -> Result<bool> {
        let Some(current) = self.inspect()? else {
            return Ok(true);
        };
        if current.identity != snapshot.identity || current.marker != snapshot.marker {
            debug!(team = %self.team, "lock marker replaced since staleness check; not reclaiming");
            return Ok(false);
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(true),
            Err(err) => Err(TeamOpsError::IoError(err)),
        }
    }
}

/// Held lock. Dropping it releases the marker if it is still ours.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        release_marker(&self.path, &self.token)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = release_marker(&self.path, &self.token) {
                warn!(path = %self.path.display(), error = %err, "failed to release lock marker");
            }
        }
    }
}

fn release_marker(path: &Path, token: &str) -> Result<()> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(TeamOpsError::IoError(err)),
    };
    match serde_json::from_slice::<LockMarker>(&bytes) {
        Ok(marker) if marker.token == token => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TeamOpsError::IoError(err)),
        },
        _ => {
            warn!(path = %path.display(), "lock marker no longer ours; leaving it in place");
            Ok(())
        }
    }
}

/// Run `body` while holding the team's lock. The lock is released on every
/// exit path, including panics unwinding through `body`.
pub fn with_team_lock<R, F>(store: &Store, team: &TeamId, body: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let lock = ProcessLock::for_team(store, team);
    let _guard = lock.acquire()?;
    body()
}
