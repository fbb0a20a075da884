//! Random payload provisioning for write tests and read-pool seeding.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const CHUNK_SIZE: usize = 1024 * 1024;

/// Upper bound for timestamp back-dating: ten years.
pub const MAX_JITTER_HOURS: f64 = 10.0 * 365.0 * 24.0;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload size must be greater than zero")]
    EmptyPayload,

    #[error("failed to write payload {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("payload {path} is {actual} bytes, expected {expected}")]
    ShortWrite {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// A generated payload file. `size_bytes` is measured from disk.
#[derive(Debug, Clone)]
pub struct PayloadArtifact {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Write `size_bytes` of non-compressible random data to `path`.
///
/// Any existing file is overwritten. With `jitter_hours > 0` the file's
/// timestamps are pushed back by a uniform random amount up to that many
/// hours, otherwise they are set to now.
pub async fn generate(
    path: &Path,
    size_bytes: u64,
    jitter_hours: f64,
) -> Result<PayloadArtifact, PayloadError> {
    if size_bytes == 0 {
        return Err(PayloadError::EmptyPayload);
    }
    let io_err = |source| PayloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }

    let mut rng = StdRng::from_entropy();
    let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = size_bytes;
    while remaining > 0 {
        let n = remaining.min(CHUNK_SIZE as u64) as usize;
        rng.fill_bytes(&mut buf[..n]);
        file.write_all(&buf[..n]).await.map_err(io_err)?;
        remaining -= n as u64;
    }
    file.flush().await.map_err(io_err)?;

    let stamp = backdated_now(&mut rng, jitter_hours);
    let std_file = file.into_std().await;
    let sized = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
        std_file.sync_all()?;
        set_file_times(&std_file, stamp)?;
        Ok(std_file.metadata()?.len())
    })
    .await
    .map_err(|e| io_err(std::io::Error::other(e)))?
    .map_err(io_err)?;

    if sized != size_bytes {
        return Err(PayloadError::ShortWrite {
            path: path.to_path_buf(),
            expected: size_bytes,
            actual: sized,
        });
    }

    debug!(path = %path.display(), size_bytes, jitter_hours, "payload generated");

    Ok(PayloadArtifact {
        path: path.to_path_buf(),
        timestamp: stamp.into(),
        size_bytes: sized,
    })
}

fn backdated_now(rng: &mut StdRng, jitter_hours: f64) -> SystemTime {
    let now = SystemTime::now();
    if jitter_hours <= 0.0 || !jitter_hours.is_finite() {
        return now;
    }
    let hours = rng.gen_range(0.0..jitter_hours.min(MAX_JITTER_HOURS));
    Duration::try_from_secs_f64(hours * 3600.0)
        .ok()
        .and_then(|back| now.checked_sub(back))
        .unwrap_or(now)
}

fn set_file_times(file: &std::fs::File, stamp: SystemTime) -> std::io::Result<()> {
    let times = std::fs::FileTimes::new()
        .set_accessed(stamp)
        .set_modified(stamp);
    #[cfg(windows)]
    let times = {
        use std::os::windows::fs::FileTimesExt;
        times.set_created(stamp)
    };
    file.set_times(times)
}
