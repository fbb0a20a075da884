//! Measurement outcome produced once per probe invocation.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cold runs provision fresh payload; warm runs reuse what the cold run left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Cold,
    Warm,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Warm => "warm",
        }
    }

    pub fn is_cold(&self) -> bool {
        matches!(self, Self::Cold)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cold" => Ok(Self::Cold),
            "warm" => Ok(Self::Warm),
            other => Err(format!("unknown run mode '{other}' (expected cold or warm)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleStatus {
    Ok,
    Error(String),
}

impl SampleStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for SampleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Error(message) => f.write_str(message),
        }
    }
}

/// One bandwidth sample for one (target, pass, mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub server: String,
    pub timestamp: DateTime<Utc>,
    pub status: SampleStatus,
    pub write_duration: Duration,
    pub write_mbps: f64,
    pub read_duration: Duration,
    pub read_mbps: f64,
    pub source_host: String,
    pub payload_size_bytes: u64,
    pub mode: RunMode,
}

impl Sample {
    /// A failed sample: status carries the message, every metric is zero.
    pub fn failed(
        server: impl Into<String>,
        source_host: impl Into<String>,
        mode: RunMode,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            timestamp,
            status: SampleStatus::Error(message.into()),
            write_duration: Duration::ZERO,
            write_mbps: 0.0,
            read_duration: Duration::ZERO,
            read_mbps: 0.0,
            source_host: source_host.into(),
            payload_size_bytes: 0,
            mode,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Megabits per second over a 2^20 divisor, rounded to two decimals.
///
/// A zero elapsed time yields 0.0 rather than infinity.
pub fn megabits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let mbps = (bytes as f64 * 8.0 / secs) / 1_048_576.0;
    (mbps * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbps_half_gib_in_four_seconds() {
        let mbps = megabits_per_second(536_870_912, Duration::from_secs_f64(4.0));
        assert_eq!(mbps, 1024.0);
    }

    #[test]
    fn test_mbps_rounds_to_two_decimals() {
        let mbps = megabits_per_second(1_000_000, Duration::from_secs(3));
        assert_eq!(mbps, 2.54);
    }

    #[test]
    fn test_mbps_zero_duration_does_not_panic() {
        assert_eq!(megabits_per_second(1024, Duration::ZERO), 0.0);
        assert_eq!(megabits_per_second(0, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_failed_sample_is_zeroed() {
        let sample = Sample::failed("fs01", "src01", RunMode::Warm, Utc::now(), "boom");
        assert!(!sample.is_ok());
        assert_eq!(sample.status.to_string(), "boom");
        assert_eq!(sample.write_mbps, 0.0);
        assert_eq!(sample.read_mbps, 0.0);
        assert_eq!(sample.write_duration, Duration::ZERO);
        assert_eq!(sample.payload_size_bytes, 0);
    }

    #[test]
    fn test_run_mode_parse() {
        assert_eq!("COLD".parse::<RunMode>().unwrap(), RunMode::Cold);
        assert_eq!("warm".parse::<RunMode>().unwrap(), RunMode::Warm);
        assert!("tepid".parse::<RunMode>().is_err());
    }
}
