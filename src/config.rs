//! TOML configuration for sharespeed.
//!
//! The file is read once at start-up. [`Config`] mirrors the file layout;
//! [`RunConfiguration`] is the validated, immutable view that the probe and
//! orchestrator are handed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::drain::{AddressRange, CandidateSet, DrainSettings};
use crate::lock::LockPolicy;
use crate::payload::MAX_JITTER_HOURS;
use crate::unc::{UncError, UncPath};

/// Environment variable that points at the config file.
pub const CONFIG_ENV: &str = "SHARESPEED_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no targets configured")]
    NoTargets,

    #[error("passes must be at least 1")]
    ZeroPasses,

    #[error("payload_size_bytes must be greater than zero")]
    ZeroPayload,

    #[error(transparent)]
    Target(#[from] UncError),

    #[error(transparent)]
    Range(#[from] crate::drain::candidates::RangeError),

    #[error("timestamp_jitter_hours must be between 0 and {max}, got {value}")]
    JitterOutOfRange { value: f64, max: f64 },

    #[error("share_mount_root is required on this platform to reach UNC targets")]
    MissingMountRoot,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub drain: DrainSection,
    #[serde(default)]
    pub lock: LockSection,
    #[serde(default)]
    pub report: ReportSection,
    #[serde(default)]
    pub mail: MailSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration file, in order:
    /// 1. an explicit path (errors are fatal),
    /// 2. `$SHARESPEED_CONFIG`,
    /// 3. `./sharespeed.toml`,
    /// 4. compiled-in defaults.
    pub fn load_layered(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SHARESPEED_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new("sharespeed.toml");
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Configured source host, or the local host name.
    pub fn source_host(&self) -> String {
        self.run.source_host.clone().unwrap_or_else(local_hostname)
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// UNC targets, measured in this order.
    pub targets: Vec<String>,
    pub passes: u32,
    pub payload_size_bytes: u64,
    /// Pause after each target's cold/warm pair.
    pub inter_pass_delay_secs: u64,
    /// Overrides the detected host name of this machine.
    pub source_host: Option<String>,
    /// Local directory for payloads, read-back copies and the warm ledger.
    pub work_dir: PathBuf,
    /// Where `\\host\share` is mounted as `<root>/host/share` (non-Windows).
    pub share_mount_root: Option<PathBuf>,
    /// Folder created under each target for test files.
    pub test_folder: String,
    /// Folder under `test_folder` holding pre-seeded read files.
    pub read_pool_folder: String,
    /// Back-date generated payloads by up to this many hours.
    pub timestamp_jitter_hours: f64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            passes: 1,
            payload_size_bytes: 512 * 1024 * 1024,
            inter_pass_delay_secs: 60,
            source_host: None,
            work_dir: std::env::temp_dir().join("sharespeed"),
            share_mount_root: None,
            test_folder: "SpeedTest".to_string(),
            read_pool_folder: "Pool".to_string(),
            timestamp_jitter_hours: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Drain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainSection {
    pub enabled: bool,
    pub timeout_secs: u64,
    /// Remote port of the sessions to wait out (SMB).
    pub remote_port: u16,
    /// Addresses, CIDR blocks, or `a-b` spans.
    pub candidate_ranges: Vec<String>,
    /// Also watch the addresses the target host names resolve to.
    pub resolve_targets: bool,
}

impl Default for DrainSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 120,
            remote_port: 445,
            candidate_ranges: Vec::new(),
            resolve_targets: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSection {
    /// Shared directory holding one marker per source host.
    pub dir: PathBuf,
    pub on_contention: LockPolicy,
    /// How long to poll for a busy lock before applying the policy.
    pub wait_secs: u64,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("sharespeed").join("locks"),
            on_contention: LockPolicy::Abort,
            wait_secs: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    /// Shared log/report directory.
    pub dir: PathBuf,
    pub csv_file: String,
    pub write_html: bool,
    pub title: String,
    pub description: String,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("sharespeed").join("reports"),
            csv_file: "SpeedTest.csv".to_string(),
            write_html: true,
            title: "File share throughput".to_string(),
            description: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSection {
    pub enabled: bool,
    /// SMTP relay as `host:port`.
    pub smtp_server: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: "localhost:25".to_string(),
            sender: "sharespeed@localhost".to_string(),
            recipients: Vec::new(),
            subject: "File share throughput report".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// RunConfiguration
// ---------------------------------------------------------------------------

/// Validated, read-only parameters for a measurement run.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub targets: Vec<UncPath>,
    pub passes: u32,
    pub payload_size_bytes: u64,
    pub inter_pass_delay: Duration,
    pub source_host: String,
    pub work_dir: PathBuf,
    pub share_mount_root: Option<PathBuf>,
    pub test_folder: String,
    pub read_pool_folder: String,
    pub timestamp_jitter_hours: f64,
    pub drain: DrainSettings,
}

impl RunConfiguration {
    /// Validate `config` without touching the network.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let run = &config.run;
        if run.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if run.passes == 0 {
            return Err(ConfigError::ZeroPasses);
        }
        if run.payload_size_bytes == 0 {
            return Err(ConfigError::ZeroPayload);
        }
        let jitter = run.timestamp_jitter_hours;
        if !(0.0..=MAX_JITTER_HOURS).contains(&jitter) {
            return Err(ConfigError::JitterOutOfRange {
                value: jitter,
                max: MAX_JITTER_HOURS,
            });
        }
        if run.share_mount_root.is_none() && !cfg!(windows) {
            return Err(ConfigError::MissingMountRoot);
        }

        let targets = run
            .targets
            .iter()
            .map(|t| UncPath::parse(t))
            .collect::<Result<Vec<_>, _>>()?;

        let ranges = config
            .drain
            .candidate_ranges
            .iter()
            .map(|r| r.parse::<AddressRange>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            targets,
            passes: run.passes,
            payload_size_bytes: run.payload_size_bytes,
            inter_pass_delay: Duration::from_secs(run.inter_pass_delay_secs),
            source_host: config.source_host(),
            work_dir: run.work_dir.clone(),
            share_mount_root: run.share_mount_root.clone(),
            test_folder: run.test_folder.clone(),
            read_pool_folder: run.read_pool_folder.clone(),
            timestamp_jitter_hours: run.timestamp_jitter_hours,
            drain: DrainSettings {
                enabled: config.drain.enabled,
                timeout: Duration::from_secs(config.drain.timeout_secs),
                remote_port: config.drain.remote_port,
                candidates: CandidateSet::new(ranges),
            },
        })
    }

    /// Validate and, when enabled, add resolved target addresses to the
    /// drain candidates.
    pub async fn build(config: &Config) -> Result<Self, ConfigError> {
        let mut rc = Self::from_config(config)?;
        if rc.drain.enabled && config.drain.resolve_targets {
            rc.drain.candidates.resolve_targets(&rc.targets).await;
        }
        if rc.drain.enabled && rc.drain.candidates.is_empty() {
            warn!("drain check enabled but no candidate addresses are known");
        }
        Ok(rc)
    }

    /// Local filesystem path of a target.
    pub fn target_root(&self, target: &UncPath) -> PathBuf {
        target.to_local_path(self.share_mount_root.as_deref())
    }

    /// `<target>/<test_folder>`.
    pub fn test_dir(&self, target: &UncPath) -> PathBuf {
        self.target_root(target).join(&self.test_folder)
    }

    /// `<target>/<test_folder>/<read_pool_folder>/<source_host>`.
    ///
    /// Each source host reads from its own pool so concurrent hosts never
    /// consume each other's files.
    pub fn read_pool_dir(&self, target: &UncPath) -> PathBuf {
        self.test_dir(target)
            .join(&self.read_pool_folder)
            .join(path_safe(&self.source_host))
    }

    /// Target-side file the write phase copies the payload to.
    pub fn remote_write_path(&self, target: &UncPath) -> PathBuf {
        self.test_dir(target).join(format!(
            "{}-payload-{}.bin",
            path_safe(&self.source_host),
            target.slug()
        ))
    }

    /// Local payload file used for a target's write tests.
    pub fn payload_path(&self, target: &UncPath) -> PathBuf {
        self.work_dir.join(format!("payload-{}.bin", target.slug()))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.work_dir.join("warm-ledger.json")
    }
}

fn path_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// Host name of this machine, `localhost` if it cannot be determined.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
