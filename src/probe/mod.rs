//! Cold/warm throughput probe.
//!
//! One probe measures one target in one mode:
//!
//! `Init → (ColdProvision | WarmLocate) → WriteCopy → DrainWait1 → ReadCopy
//!  → DrainWait2 → Finalize → Done`, or `Failed` from any step.
//!
//! Every invocation produces exactly one [`Sample`]; a failure is reported in
//! the sample's status rather than returned as an error.

pub mod ledger;
pub mod pool;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RunConfiguration;
use crate::drain::DrainBarrier;
use crate::payload::{self, PayloadError};
use crate::sample::{megabits_per_second, RunMode, Sample, SampleStatus};
use crate::unc::UncPath;

pub use ledger::WarmLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Write => f.write_str("write"),
            Direction::Read => f.write_str("read"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("target unreachable: {path}: {source}")]
    TargetUnreachable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("payload provisioning failed: {0}")]
    Provision(#[from] PayloadError),

    #[error("{direction} copy failed: {from} -> {to}: {source}")]
    Copy {
        direction: Direction,
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{direction} copy incomplete: {from} -> {to}: copied {copied} of {expected} bytes")]
    ShortCopy {
        direction: Direction,
        from: PathBuf,
        to: PathBuf,
        copied: u64,
        expected: u64,
    },

    #[error("read pool {path} has no files")]
    EmptyReadPool { path: PathBuf },

    #[error("warm run found no cold-run artifact: {what}")]
    MissingWarmArtifact { what: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Init,
    ColdProvision,
    WarmLocate,
    WriteCopy,
    DrainWait1,
    ReadCopy,
    DrainWait2,
    Finalize,
    Done,
    Failed,
}

struct Measured {
    payload_bytes: u64,
    write: Duration,
    read_bytes: u64,
    read: Duration,
}

pub struct ThroughputProbe<'a> {
    config: &'a RunConfiguration,
    barrier: &'a DrainBarrier,
    ledger: &'a mut WarmLedger,
    state: ProbeState,
    last_error: Option<ProbeError>,
}

impl<'a> ThroughputProbe<'a> {
    pub fn new(
        config: &'a RunConfiguration,
        barrier: &'a DrainBarrier,
        ledger: &'a mut WarmLedger,
    ) -> Self {
        Self {
            config,
            barrier,
            ledger,
            state: ProbeState::Init,
            last_error: None,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Error behind the most recent failed sample.
    pub fn last_error(&self) -> Option<&ProbeError> {
        self.last_error.as_ref()
    }

    /// Measure `target` in `mode`.
    pub async fn run(&mut self, target: &UncPath, mode: RunMode) -> Sample {
        let timestamp = Utc::now();
        self.last_error = None;
        self.state = ProbeState::Init;
        info!(%target, %mode, "probe starting");

        match self.execute(target, mode).await {
            Ok(m) => {
                self.enter(ProbeState::Done);
                let sample = Sample {
                    server: target.host.clone(),
                    timestamp,
                    status: SampleStatus::Ok,
                    write_duration: m.write,
                    write_mbps: megabits_per_second(m.payload_bytes, m.write),
                    read_duration: m.read,
                    read_mbps: megabits_per_second(m.read_bytes, m.read),
                    source_host: self.config.source_host.clone(),
                    payload_size_bytes: m.payload_bytes,
                    mode,
                };
                info!(
                    %target,
                    %mode,
                    write_mbps = sample.write_mbps,
                    read_mbps = sample.read_mbps,
                    "probe complete"
                );
                sample
            }
            Err(e) => {
                self.enter(ProbeState::Failed);
                warn!(%target, %mode, error = %e, "probe failed");
                self.discard(target).await;
                let sample = Sample::failed(
                    target.host.clone(),
                    self.config.source_host.clone(),
                    mode,
                    timestamp,
                    e.to_string(),
                );
                self.last_error = Some(e);
                sample
            }
        }
    }

    fn enter(&mut self, next: ProbeState) {
        debug!(from = ?self.state, to = ?next, "probe state");
        self.state = next;
    }

    async fn execute(&mut self, target: &UncPath, mode: RunMode) -> Result<Measured, ProbeError> {
        self.prepare_target(target).await?;

        let (payload, payload_bytes) = match mode {
            RunMode::Cold => {
                self.enter(ProbeState::ColdProvision);
                let artifact = payload::generate(
                    &self.config.payload_path(target),
                    self.config.payload_size_bytes,
                    self.config.timestamp_jitter_hours,
                )
                .await?;
                (artifact.path, artifact.size_bytes)
            }
            RunMode::Warm => {
                self.enter(ProbeState::WarmLocate);
                self.locate_warm(target).await?
            }
        };

        self.enter(ProbeState::WriteCopy);
        let remote = self.config.remote_write_path(target);
        let write = timed_copy(Direction::Write, &payload, &remote, payload_bytes).await?;
        remove_quietly(&remote).await;

        self.enter(ProbeState::DrainWait1);
        self.barrier.gate(&self.config.drain, "after-write").await;

        self.enter(ProbeState::ReadCopy);
        let (read_bytes, read) = match mode {
            RunMode::Cold => self.read_cold(target).await?,
            RunMode::Warm => self.read_warm(target).await?,
        };

        self.enter(ProbeState::DrainWait2);
        self.barrier.gate(&self.config.drain, "after-read").await;

        self.enter(ProbeState::Finalize);
        if mode == RunMode::Warm {
            remove_quietly(&payload).await;
        }

        Ok(Measured {
            payload_bytes,
            write,
            read_bytes,
            read,
        })
    }

    /// The target root must already exist; only the test folder is created.
    async fn prepare_target(&self, target: &UncPath) -> Result<(), ProbeError> {
        let root = self.config.target_root(target);
        match tokio::fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ProbeError::TargetUnreachable {
                    path: root,
                    source: io::Error::other("not a directory"),
                })
            }
            Err(source) => return Err(ProbeError::TargetUnreachable { path: root, source }),
        }

        let test_dir = self.config.test_dir(target);
        tokio::fs::create_dir_all(&test_dir)
            .await
            .map_err(|source| ProbeError::TargetUnreachable {
                path: test_dir.clone(),
                source,
            })?;
        Ok(())
    }

    /// The cold run's payload and read selection must both still exist.
    async fn locate_warm(&self, target: &UncPath) -> Result<(PathBuf, u64), ProbeError> {
        let payload = self.config.payload_path(target);
        let meta = match tokio::fs::metadata(&payload).await {
            Ok(meta) if meta.is_file() => meta,
            _ => {
                return Err(ProbeError::MissingWarmArtifact {
                    what: format!("payload {} not found", payload.display()),
                })
            }
        };
        if self.ledger.get(&target.to_string()).is_none() {
            return Err(ProbeError::MissingWarmArtifact {
                what: format!("no cold-run read selection recorded for {target}"),
            });
        }
        Ok((payload, meta.len()))
    }

    async fn read_cold(&mut self, target: &UncPath) -> Result<(u64, Duration), ProbeError> {
        let pool_dir = self.config.read_pool_dir(target);
        let source = pool::select_first(&pool_dir)
            .await
            .map_err(|source| ProbeError::TargetUnreachable {
                path: pool_dir.clone(),
                source,
            })?
            .ok_or_else(|| ProbeError::EmptyReadPool {
                path: pool_dir.clone(),
            })?;

        let local = self.local_read_path(target, &source);
        let bytes = source_len(Direction::Read, &source, &local).await?;
        self.ledger.remember(&target.to_string(), source.clone()).await;

        let elapsed = timed_copy(Direction::Read, &source, &local, bytes).await?;
        remove_quietly(&local).await;
        Ok((bytes, elapsed))
    }

    async fn read_warm(&mut self, target: &UncPath) -> Result<(u64, Duration), ProbeError> {
        let source = self
            .ledger
            .take(&target.to_string())
            .await
            .ok_or_else(|| ProbeError::MissingWarmArtifact {
                what: format!("no cold-run read selection recorded for {target}"),
            })?;

        let local = self.local_read_path(target, &source);
        let bytes = source_len(Direction::Read, &source, &local).await?;
        let elapsed = timed_copy(Direction::Read, &source, &local, bytes).await?;
        remove_quietly(&local).await;
        // The warm read consumes the pool file.
        remove_quietly(&source).await;
        Ok((bytes, elapsed))
    }

    fn local_read_path(&self, target: &UncPath, source: &Path) -> PathBuf {
        self.config
            .work_dir
            .join(format!("read-{}-{}", target.slug(), file_name(source)))
    }

    /// After a failure, drop the payload and read selection so a following
    /// warm probe fails clearly instead of reusing partial state.
    async fn discard(&mut self, target: &UncPath) {
        remove_quietly(&self.config.payload_path(target)).await;
        self.ledger.take(&target.to_string()).await;
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "payload.bin".to_string())
}

async fn source_len(direction: Direction, source: &Path, to: &Path) -> Result<u64, ProbeError> {
    tokio::fs::metadata(source)
        .await
        .map(|m| m.len())
        .map_err(|e| ProbeError::Copy {
            direction,
            from: source.to_path_buf(),
            to: to.to_path_buf(),
            source: e,
        })
}

/// Copy `from` to `to` and time it. The copy must move `expected` bytes.
async fn timed_copy(
    direction: Direction,
    from: &Path,
    to: &Path,
    expected: u64,
) -> Result<Duration, ProbeError> {
    let start = Instant::now();
    let copied = match tokio::fs::copy(from, to).await {
        Ok(n) => n,
        Err(source) => {
            remove_quietly(to).await;
            return Err(ProbeError::Copy {
                direction,
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            });
        }
    };
    let elapsed = start.elapsed();

    if copied != expected {
        remove_quietly(to).await;
        return Err(ProbeError::ShortCopy {
            direction,
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            copied,
            expected,
        });
    }

    debug!(%direction, bytes = copied, elapsed_ms = elapsed.as_millis() as u64, "copy finished");
    Ok(elapsed)
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "cleanup failed"),
    }
}
