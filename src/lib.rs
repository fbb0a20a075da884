//! sharespeed -- cold/warm file-share throughput measurement.
//!
//! Copies non-compressible payloads to and from UNC targets, waits for SMB
//! sessions to drain between phases, and records one sample per probe to a
//! shared CSV log, an HTML report, and optionally a mailed summary.

pub mod config;
pub mod drain;
pub mod lock;
pub mod notify;
pub mod orchestrator;
pub mod payload;
pub mod probe;
pub mod report;
pub mod sample;
pub mod unc;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Config, RunConfiguration};
use crate::drain::DrainBarrier;
use crate::lock::{LockGuard, RunLock};
use crate::notify::{Notification, Notifier, SmtpNotifier};
use crate::orchestrator::RunOrchestrator;
use crate::probe::{ThroughputProbe, WarmLedger};
use crate::report::csv::SampleLog;
use crate::report::RunSummary;
use crate::sample::{RunMode, Sample};

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub samples: Vec<Sample>,
    pub csv_path: PathBuf,
    pub report_path: Option<PathBuf>,
}

/// Full measurement run: lock, every pass over every target, reports, mail.
pub async fn run_measurement(config: &Config) -> Result<RunOutcome> {
    let run_config = RunConfiguration::build(config)
        .await
        .context("invalid configuration")?;
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let clock = Instant::now();

    info!(
        %run_id,
        source_host = %run_config.source_host,
        targets = run_config.targets.len(),
        passes = run_config.passes,
        payload_size_bytes = run_config.payload_size_bytes,
        "starting measurement run"
    );

    let mut guard = acquire_lock(config, &run_config.source_host).await?;

    let csv_path = config.report.dir.join(&config.report.csv_file);
    let sample_log = SampleLog::open(csv_path.clone()).await?;
    let barrier = DrainBarrier::system();
    let samples = RunOrchestrator::new(&run_config, &barrier)
        .with_sample_log(&sample_log)
        .run()
        .await;

    if let Some(guard) = guard.as_mut() {
        guard.release();
    }

    let summary = RunSummary {
        run_id,
        title: config.report.title.clone(),
        description: config.report.description.clone(),
        source_host: run_config.source_host.clone(),
        started_at,
        elapsed: clock.elapsed(),
    };

    let report_path = if config.report.write_html {
        match report::write_html(&config.report.dir, &summary, &samples).await {
            Ok(path) => {
                info!(path = %path.display(), "report written");
                Some(path)
            }
            Err(e) => {
                error!(error = %e, "failed to write report");
                None
            }
        }
    } else {
        None
    };

    if config.mail.enabled {
        mail_report(config, &summary, &samples).await;
    }

    Ok(RunOutcome {
        summary,
        samples,
        csv_path,
        report_path,
    })
}

/// One probe against `target` in `mode`, under the run lock.
///
/// Cold and warm probes may be issued by separate invocations; the warm
/// ledger in the work directory carries the cold selection across.
pub async fn probe_once(config: &Config, target: &str, mode: RunMode) -> Result<Sample> {
    let mut config = config.clone();
    config.run.targets = vec![target.to_string()];
    let run_config = RunConfiguration::build(&config)
        .await
        .context("invalid configuration")?;

    let _guard = acquire_lock(&config, &run_config.source_host).await?;

    let sample_log = SampleLog::open(config.report.dir.join(&config.report.csv_file)).await?;
    let barrier = DrainBarrier::system();
    let mut ledger = WarmLedger::open(run_config.ledger_path()).await;

    let sample = ThroughputProbe::new(&run_config, &barrier, &mut ledger)
        .run(&run_config.targets[0], mode)
        .await;
    if let Err(e) = sample_log.append(&sample).await {
        error!(error = %e, "failed to append sample");
    }
    Ok(sample)
}

/// Seed the read pool of every configured target with `count` files.
pub async fn seed_read_pools(
    config: &Config,
    count: usize,
    size_bytes: u64,
    jitter_hours: f64,
) -> Result<Vec<PathBuf>> {
    let run_config = RunConfiguration::from_config(config).context("invalid configuration")?;
    let mut created = Vec::new();
    for target in &run_config.targets {
        let root = run_config.target_root(target);
        if !tokio::fs::metadata(&root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            bail!("target unreachable: {} ({})", target, root.display());
        }
        let dir = run_config.read_pool_dir(target);
        let files = probe::pool::seed(&dir, count, size_bytes, jitter_hours)
            .await
            .with_context(|| format!("failed to seed read pool for {target}"))?;
        created.extend(files);
    }
    Ok(created)
}

/// Remove this host's lock marker. Returns whether one existed.
pub fn unlock(config: &Config) -> Result<bool> {
    Ok(RunLock::force_release(&config.lock.dir, &config.source_host())?)
}

async fn acquire_lock(config: &Config, owner: &str) -> Result<Option<LockGuard>> {
    let guard = RunLock::acquire_for_run(
        &config.lock.dir,
        owner,
        Duration::from_secs(config.lock.wait_secs),
        config.lock.on_contention,
    )
    .await?;
    Ok(guard)
}

async fn mail_report(config: &Config, summary: &RunSummary, samples: &[Sample]) {
    let html_body = match report::html::render(summary, samples) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to render mail body, not sending");
            return;
        }
    };
    let notification = Notification {
        subject: config.mail.subject.clone(),
        sender: config.mail.sender.clone(),
        recipients: config.mail.recipients.clone(),
        html_body,
    };
    let notifier = SmtpNotifier::new(config.mail.smtp_server.clone(), summary.source_host.clone());
    if let Err(e) = notifier.send(&notification).await {
        warn!(error = %e, relay = %config.mail.smtp_server, "failed to mail report");
    }
}
