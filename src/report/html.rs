//! HTML run report.

use askama::Template;

use super::RunSummary;
use crate::sample::Sample;

struct ReportRow {
    server: String,
    timestamp: String,
    status: String,
    write_time: String,
    write_mbps: String,
    read_time: String,
    read_mbps: String,
    source_host: String,
    size: u64,
    cold: &'static str,
    failed: bool,
}

impl From<&Sample> for ReportRow {
    fn from(s: &Sample) -> Self {
        Self {
            server: s.server.clone(),
            timestamp: s.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            status: s.status.to_string(),
            write_time: format!("{:.3}", s.write_duration.as_secs_f64()),
            write_mbps: format!("{:.2}", s.write_mbps),
            read_time: format!("{:.3}", s.read_duration.as_secs_f64()),
            read_mbps: format!("{:.2}", s.read_mbps),
            source_host: s.source_host.clone(),
            size: s.payload_size_bytes,
            cold: if s.mode.is_cold() { "True" } else { "False" },
            failed: !s.is_ok(),
        }
    }
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate<'a> {
    title: &'a str,
    description: &'a str,
    source_host: &'a str,
    run_id: String,
    started_at: String,
    elapsed: String,
    failed: usize,
    rows: Vec<ReportRow>,
}

/// Render the run summary and every sample as a standalone HTML page.
pub fn render(summary: &RunSummary, samples: &[Sample]) -> Result<String, askama::Error> {
    let rows: Vec<ReportRow> = samples.iter().map(ReportRow::from).collect();
    ReportTemplate {
        title: &summary.title,
        description: &summary.description,
        source_host: &summary.source_host,
        run_id: summary.run_id.to_string(),
        started_at: summary.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        elapsed: super::format_elapsed(summary.elapsed),
        failed: rows.iter().filter(|r| r.failed).count(),
        rows,
    }
    .render()
}
