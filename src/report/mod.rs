//! Sample export and run reports.

pub mod csv;
pub mod html;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sample::Sample;

/// Run-level facts shown at the top of a report.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub title: String,
    pub description: String,
    pub source_host: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// `1h 02m 03s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    format!("{h}h {m:02}m {s:02}s")
}

/// Render the HTML report into `dir` and return its path.
pub async fn write_html(dir: &Path, summary: &RunSummary, samples: &[Sample]) -> Result<PathBuf> {
    let body = html::render(summary, samples).context("failed to render report")?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create report directory: {}", dir.display()))?;
    let path = dir.join(format!(
        "report-{}-{}.html",
        summary.source_host,
        summary.started_at.format("%Y%m%d-%H%M%S")
    ));
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("failed to write report: {}", path.display()))?;
    Ok(path)
}

/// One-line text summary, used for logs and the CLI.
pub fn format_sample(sample: &Sample) -> String {
    if sample.is_ok() {
        format!(
            "{:<16} {:<4}  write {:>9.2} Mbps ({:.2}s)  read {:>9.2} Mbps ({:.2}s)",
            sample.server,
            sample.mode,
            sample.write_mbps,
            sample.write_duration.as_secs_f64(),
            sample.read_mbps,
            sample.read_duration.as_secs_f64(),
        )
    } else {
        format!("{:<16} {:<4}  FAILED: {}", sample.server, sample.mode, sample.status)
    }
}
