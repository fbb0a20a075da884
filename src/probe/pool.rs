//! Target-side read pool: pre-seeded random files that read tests copy back.

use std::io;
use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::payload::{self, PayloadError};

/// First regular file in `dir`, ordered by file name.
///
/// `Ok(None)` when the directory is missing or holds no files.
pub async fn select_first(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files.into_iter().next())
}

/// Fill `dir` with `count` random files of `size_bytes`, back-dated by up to
/// `jitter_hours` so the share does not see them as recently written.
pub async fn seed(
    dir: &Path,
    count: usize,
    size_bytes: u64,
    jitter_hours: f64,
) -> Result<Vec<PathBuf>, PayloadError> {
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        let path = dir.join(format!("pool-{}.bin", Uuid::new_v4().simple()));
        payload::generate(&path, size_bytes, jitter_hours).await?;
        created.push(path);
    }
    info!(dir = %dir.display(), count, size_bytes, "read pool seeded");
    Ok(created)
}
