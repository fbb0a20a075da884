//! TCP drain barrier.
//!
//! Copies over SMB shares can leave sessions open for a while after the copy
//! returns. Starting the next measurement while one is still established
//! skews it, so test phases wait here until no established connection to a
//! candidate address on the watched port remains, or until a soft timeout.

pub mod candidates;
pub mod table;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

pub use candidates::{AddressRange, CandidateSet};
pub use table::{ConnectionTable, TcpEntry, TcpState};

/// Poll cadence of the barrier.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainOutcome {
    pub drained: bool,
    pub elapsed: Duration,
}

/// Drain check parameters taken from the run configuration.
#[derive(Debug, Clone)]
pub struct DrainSettings {
    pub enabled: bool,
    pub timeout: Duration,
    pub remote_port: u16,
    pub candidates: CandidateSet,
}

pub struct DrainBarrier {
    table: Box<dyn ConnectionTable>,
    poll_interval: Duration,
}

impl DrainBarrier {
    pub fn new(table: Box<dyn ConnectionTable>) -> Self {
        Self {
            table,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Barrier backed by the platform connection table.
    pub fn system() -> Self {
        Self::new(table::system_table())
    }

    /// Block until no matching established connection remains.
    ///
    /// Returns `drained = false` once `timeout` has elapsed. The table is
    /// checked immediately, then once per poll interval.
    pub async fn await_drain(
        &self,
        timeout: Duration,
        remote_port: u16,
        candidates: &CandidateSet,
    ) -> DrainOutcome {
        let start = Instant::now();
        loop {
            let active = match self.table.connections().await {
                Ok(entries) => count_matching(&entries, remote_port, candidates),
                Err(e) => {
                    warn!(error = %e, "connection table unavailable, skipping drain wait");
                    return DrainOutcome {
                        drained: false,
                        elapsed: start.elapsed(),
                    };
                }
            };

            let elapsed = start.elapsed();
            if active == 0 {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "connections drained");
                return DrainOutcome {
                    drained: true,
                    elapsed,
                };
            }
            if elapsed >= timeout {
                return DrainOutcome {
                    drained: false,
                    elapsed,
                };
            }

            debug!(active, remote_port, "waiting for established connections to close");
            let remaining = timeout - elapsed;
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    /// Run the barrier per `settings`, logging a soft timeout.
    ///
    /// Returns `None` when drain checking is disabled.
    pub async fn gate(&self, settings: &DrainSettings, phase: &str) -> Option<DrainOutcome> {
        if !settings.enabled {
            return None;
        }
        let outcome = self
            .await_drain(settings.timeout, settings.remote_port, &settings.candidates)
            .await;
        if !outcome.drained {
            warn!(
                phase,
                timeout_secs = settings.timeout.as_secs(),
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "connections still established after drain timeout, proceeding"
            );
        }
        Some(outcome)
    }
}

fn count_matching(entries: &[TcpEntry], remote_port: u16, candidates: &CandidateSet) -> usize {
    entries
        .iter()
        .filter(|e| {
            e.is_established()
                && e.remote.port() == remote_port
                && candidates.contains(&e.remote.ip())
        })
        .count()
}
