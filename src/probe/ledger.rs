//! Remembers which read-pool file each target's cold probe picked, so the
//! following warm probe reads the same file back.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    selections: BTreeMap<String, PathBuf>,
}

/// JSON-backed map of target → selected read file.
#[derive(Debug)]
pub struct WarmLedger {
    path: PathBuf,
    data: LedgerFile,
}

impl WarmLedger {
    /// Open the ledger at `path`. A missing or corrupt file starts empty.
    pub async fn open(path: PathBuf) -> Self {
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "warm ledger unreadable, starting empty");
                LedgerFile::default()
            }),
            Err(_) => LedgerFile::default(),
        };
        Self { path, data }
    }

    pub fn get(&self, target: &str) -> Option<&PathBuf> {
        self.data.selections.get(target)
    }

    /// Record the selection for `target`.
    ///
    /// The in-memory entry is kept even if persisting it fails, so a warm
    /// probe later in the same process still finds it.
    pub async fn remember(&mut self, target: &str, file: PathBuf) {
        self.data.selections.insert(target.to_string(), file);
        self.save().await;
    }

    /// Remove and return the selection for `target`.
    pub async fn take(&mut self, target: &str) -> Option<PathBuf> {
        let taken = self.data.selections.remove(target);
        if taken.is_some() {
            self.save().await;
        }
        taken
    }

    async fn save(&self) {
        if let Err(e) = self.try_save().await {
            warn!(path = %self.path.display(), error = %e, "failed to persist warm ledger");
        }
    }

    async fn try_save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&self.data)?;
        tokio::fs::write(&self.path, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_selection_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = WarmLedger::open(path.clone()).await;
        ledger
            .remember(r"\\fs01\data", PathBuf::from("/mnt/fs01/data/SpeedTest/Pool/a.bin"))
            .await;

        let mut reopened = WarmLedger::open(path).await;
        assert_eq!(
            reopened.get(r"\\fs01\data"),
            Some(&PathBuf::from("/mnt/fs01/data/SpeedTest/Pool/a.bin"))
        );
        assert!(reopened.take(r"\\fs01\data").await.is_some());
        assert!(reopened.take(r"\\fs01\data").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_starts_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"{not json").unwrap();

        let ledger = WarmLedger::open(path).await;
        assert!(ledger.get("anything").is_none());
    }
}
