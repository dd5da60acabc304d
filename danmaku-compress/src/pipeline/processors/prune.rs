//! Removes aborted backup recordings.
//!
//! A recorder that reconnects repeatedly leaves behind tiny `.flv` files with
//! matching danmaku `.xml` files. Anything below the size threshold is
//! deleted together with its `.xml` companion.

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, error, info, warn};

use super::utils::has_extension;
use crate::Error;
use crate::config::PruneSettings;
use crate::pipeline::{Stage, StageError, StageOutcome, StageProcessor};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub struct BackupPruner {
    settings: PruneSettings,
}

impl BackupPruner {
    pub fn new(settings: PruneSettings) -> Self {
        Self { settings }
    }

    fn min_size_bytes(&self) -> u64 {
        (self.settings.min_size_mb * BYTES_PER_MB) as u64
    }

    fn name_matches(&self, name: &str) -> bool {
        match &self.settings.name_prefix {
            Some(prefix) => name.starts_with(prefix.as_str()),
            None => true,
        }
    }
}

#[async_trait]
impl StageProcessor for BackupPruner {
    fn stage(&self) -> Stage {
        Stage::Prune
    }

    fn name(&self) -> &'static str {
        "BackupPruner"
    }

    async fn execute(&self) -> Result<StageOutcome, StageError> {
        let dir = &self.settings.backup_folder;
        if !fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) {
            warn!("Backup folder {} does not exist or is not a directory", dir.display());
            return Ok(StageOutcome::skipped(format!(
                "backup folder {} not found",
                dir.display()
            )));
        }

        let threshold = self.min_size_bytes();
        info!(
            "Scanning {} for recordings smaller than {} MB",
            dir.display(),
            self.settings.min_size_mb
        );

        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| Error::io_path("reading directory", dir, e))?;

        let mut removed = 0usize;
        let mut failed = 0usize;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(Error::io_path("reading directory", dir, e).into()),
            };
            let path = entry.path();
            if !has_extension(&path, "flv") {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.name_matches(&name) {
                continue;
            }

            // The file may vanish between listing and stat.
            let size = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta.len(),
                Ok(_) => continue,
                Err(e) => {
                    warn!("Recording {} disappeared while scanning: {}", name, e);
                    continue;
                }
            };
            if size >= threshold {
                continue;
            }

            info!(
                "Removing {} ({:.2} MB, below threshold)",
                name,
                size as f64 / BYTES_PER_MB
            );
            if let Err(e) = fs::remove_file(&path).await {
                error!("Failed to delete {}: {}", name, e);
                failed += 1;
                continue;
            }
            removed += 1;

            let xml = path.with_extension("xml");
            match fs::remove_file(&xml).await {
                Ok(()) => debug!("Removed companion {}", xml.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("No danmaku file found next to {}", name);
                }
                Err(e) => error!("Failed to delete {}: {}", xml.display(), e),
            }
        }

        info!("Prune finished: {} removed, {} failed", removed, failed);
        let mut summary = format!("removed {removed} recordings");
        if failed > 0 {
            summary.push_str(&format!(", {failed} could not be deleted"));
        }
        Ok(StageOutcome::completed_with(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn pruner(dir: &Path, prefix: Option<&str>) -> BackupPruner {
        BackupPruner::new(PruneSettings {
            backup_folder: dir.to_path_buf(),
            min_size_mb: 1.0,
            name_prefix: prefix.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_removes_small_recordings_and_companions() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join("small.flv"), vec![0u8; 1024]).unwrap();
        std::fs::write(dir.join("small.xml"), "<i></i>").unwrap();
        std::fs::write(dir.join("big.flv"), vec![0u8; 2 * 1024 * 1024]).unwrap();
        std::fs::write(dir.join("big.xml"), "<i></i>").unwrap();
        std::fs::write(dir.join("notes.txt"), "x").unwrap();

        let outcome = pruner(dir, None).execute().await.unwrap();

        assert_eq!(outcome, StageOutcome::completed_with("removed 1 recordings"));
        assert!(!dir.join("small.flv").exists());
        assert!(!dir.join("small.xml").exists());
        assert!(dir.join("big.flv").exists());
        assert!(dir.join("big.xml").exists());
        assert!(dir.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_prefix_limits_candidates() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        std::fs::write(dir.join("stream-2024T01.flv"), b"x").unwrap();
        std::fs::write(dir.join("other.flv"), b"x").unwrap();

        pruner(dir, Some("stream-")).execute().await.unwrap();

        assert!(!dir.join("stream-2024T01.flv").exists());
        assert!(dir.join("other.flv").exists());
    }

    #[tokio::test]
    async fn test_missing_folder_is_skipped() {
        let temp = TempDir::new().unwrap();
        let outcome = pruner(&temp.path().join("gone"), None)
            .execute()
            .await
            .unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped { .. }));
    }
}
