//! Append-only CSV sample log.
//!
//! The header is written only when the file is new or empty; every sample is
//! appended as one row and flushed immediately so an interrupted run keeps
//! what it measured.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::sample::Sample;

pub const HEADER: &str =
    "Server,TimeStamp,Status,WriteTime,WriteMbps,ReadTime,ReadMbps,SourceServer,Size,ColdRun";

pub struct SampleLog {
    path: PathBuf,
    writer: Mutex<tokio::fs::File>,
}

impl SampleLog {
    /// Open (or create) the log at `path` in append mode.
    pub async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open sample log: {}", path.display()))?;

        let len = file
            .metadata()
            .await
            .with_context(|| format!("failed to stat sample log: {}", path.display()))?
            .len();
        if len == 0 {
            let header = encode_record(HEADER.split(','))?;
            file.write_all(&header)
                .await
                .with_context(|| format!("failed to write header: {}", path.display()))?;
            file.flush().await?;
        }

        debug!(path = %path.display(), "sample log opened");
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    pub async fn append(&self, sample: &Sample) -> Result<()> {
        let line = encode_record(row_fields(sample))?;

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .with_context(|| format!("failed to write to sample log: {}", self.path.display()))?;
        writer
            .flush()
            .await
            .with_context(|| format!("failed to flush sample log: {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Column values of one row, in `HEADER` order.
pub fn row_fields(sample: &Sample) -> [String; 10] {
    [
        sample.server.clone(),
        sample.timestamp.to_rfc3339(),
        sample.status.to_string(),
        format!("{:.3}", sample.write_duration.as_secs_f64()),
        format!("{:.2}", sample.write_mbps),
        format!("{:.3}", sample.read_duration.as_secs_f64()),
        format!("{:.2}", sample.read_mbps),
        sample.source_host.clone(),
        sample.payload_size_bytes.to_string(),
        if sample.mode.is_cold() { "True" } else { "False" }.to_string(),
    ]
}

/// One newline-terminated CSV record, quoted as needed.
pub fn encode_record<I, T>(fields: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(::csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields).context("failed to encode csv record")?;
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to encode csv record: {}", e.error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{RunMode, SampleStatus};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn sample(mode: RunMode, status: SampleStatus) -> Sample {
        Sample {
            server: "fs01".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
            status,
            write_duration: Duration::from_millis(4000),
            write_mbps: 1024.0,
            read_duration: Duration::from_millis(2500),
            read_mbps: 1638.4,
            source_host: "src01".to_string(),
            payload_size_bytes: 536_870_912,
            mode,
        }
    }

    fn encode(sample: &Sample) -> String {
        String::from_utf8(encode_record(row_fields(sample)).unwrap()).unwrap()
    }

    #[test]
    fn test_encode_row() {
        let row = encode(&sample(RunMode::Cold, SampleStatus::Ok));
        assert_eq!(
            row,
            "fs01,2026-03-04T05:06:07+00:00,OK,4.000,1024.00,2.500,1638.40,src01,536870912,True\n"
        );
    }

    #[test]
    fn test_status_with_comma_is_quoted() {
        let row = encode(&sample(
            RunMode::Warm,
            SampleStatus::Error("copy failed: a, \"b\"".to_string()),
        ));
        assert!(row.contains(r#""copy failed: a, ""b""""#));
        assert!(row.ends_with(",False\n"));
    }

    #[tokio::test]
    async fn test_header_written_once_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/SpeedTest.csv");

        {
            let log = SampleLog::open(path.clone()).await.unwrap();
            log.append(&sample(RunMode::Cold, SampleStatus::Ok)).await.unwrap();
        }
        {
            let log = SampleLog::open(path.clone()).await.unwrap();
            log.append(&sample(RunMode::Warm, SampleStatus::Ok)).await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].ends_with("True"));
        assert!(lines[2].ends_with("False"));
    }
}
