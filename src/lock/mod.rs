//! Run-serialization lock.
//!
//! A run owns `<dir>/<host>.lock` for as long as its [`LockGuard`] lives. The
//! marker is created with `create_new` so two processes racing for the same
//! host never both succeed, and it is removed on every exit path through the
//! guard's `Drop`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("run already in progress: {path} is held by {owner}")]
    AlreadyLocked { owner: String, path: PathBuf },

    #[error("lock I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What to do when another run holds the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Refuse to start.
    Abort,
    /// Log a warning and run without owning the marker.
    Warn,
}

/// Contents of a lock marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

pub struct RunLock;

impl RunLock {
    /// Marker path for `owner` under `dir`.
    pub fn marker_path(dir: &Path, owner: &str) -> PathBuf {
        dir.join(format!("{owner}.lock"))
    }

    /// Try once to take the marker.
    pub fn acquire(dir: &Path, owner: &str) -> Result<LockGuard, LockError> {
        let path = Self::marker_path(dir, owner);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(LockError::AlreadyLocked {
                    owner: read_owner(&path),
                    path: path.clone(),
                });
            }
            Err(e) => return Err(io_err(e)),
        };

        // From here on the guard owns the marker, so a failed write below
        // still removes it when the guard drops.
        let mut guard = LockGuard {
            path: path.clone(),
            released: false,
        };

        let record = LockRecord {
            owner: owner.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| io_err(std::io::Error::other(e)))?;
        if let Err(e) = file.write_all(&body).and_then(|_| file.sync_all()) {
            guard.release();
            return Err(io_err(e));
        }

        info!(path = %path.display(), "run lock acquired");
        Ok(guard)
    }

    /// Poll for the marker once per second for up to `wait`.
    pub async fn acquire_with_wait(
        dir: &Path,
        owner: &str,
        wait: Duration,
    ) -> Result<LockGuard, LockError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match Self::acquire(dir, owner) {
                Err(LockError::AlreadyLocked { owner: holder, path })
                    if tokio::time::Instant::now() < deadline =>
                {
                    debug!(holder = %holder, path = %path.display(), "lock busy, waiting");
                    let remaining = deadline - tokio::time::Instant::now();
                    tokio::time::sleep(WAIT_POLL_INTERVAL.min(remaining)).await;
                }
                other => return other,
            }
        }
    }

    /// Acquire according to `policy`.
    ///
    /// `Ok(None)` means the marker is held elsewhere and the policy allows
    /// proceeding without it.
    pub async fn acquire_for_run(
        dir: &Path,
        owner: &str,
        wait: Duration,
        policy: LockPolicy,
    ) -> Result<Option<LockGuard>, LockError> {
        match Self::acquire_with_wait(dir, owner, wait).await {
            Ok(guard) => Ok(Some(guard)),
            Err(LockError::AlreadyLocked { owner: holder, path }) if policy == LockPolicy::Warn => {
                warn!(
                    holder = %holder,
                    path = %path.display(),
                    "another run holds the lock, proceeding anyway"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a marker left behind by a crashed run. Returns whether one existed.
    pub fn force_release(dir: &Path, owner: &str) -> Result<bool, LockError> {
        let path = Self::marker_path(dir, owner);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                warn!(path = %path.display(), "stale run lock removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }
}

fn read_owner(path: &Path) -> String {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockRecord>(&bytes).ok())
        .map(|record| record.owner)
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
}

/// Ownership of a lock marker. Dropping it releases the marker.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "run lock released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "run lock already gone")
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove run lock"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}
