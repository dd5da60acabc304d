//! Publishes encoded videos with biliup-rs.
//!
//! biliup reads its own config file (streamer folders, credentials, titles)
//! and uploads everything it finds, so this processor only has to launch it
//! from its install directory.

use std::path::Path;

use async_trait::async_trait;
use process_utils::{run_captured, tokio_command};
use tracing::{info, warn};

use super::utils::describe_exit;
use crate::config::UploadSettings;
use crate::pipeline::{Stage, StageError, StageOutcome, StageProcessor};

#[cfg(windows)]
const BILIUP_BINARY: &str = "biliup.exe";
#[cfg(not(windows))]
const BILIUP_BINARY: &str = "biliup";

pub struct BiliupUploader {
    settings: UploadSettings,
}

impl BiliupUploader {
    pub fn new(settings: UploadSettings) -> Self {
        Self { settings }
    }

    /// Warn early about an install that cannot work; the spawn still decides.
    fn check_binary(binary: &Path) {
        let meta = match std::fs::metadata(binary) {
            Ok(meta) => meta,
            Err(_) => {
                warn!("biliup binary not found at {}", binary.display());
                return;
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                warn!("biliup binary {} is not executable", binary.display());
            }
        }
        #[cfg(not(unix))]
        let _ = meta;
    }
}

#[async_trait]
impl StageProcessor for BiliupUploader {
    fn stage(&self) -> Stage {
        Stage::Upload
    }

    fn name(&self) -> &'static str {
        "BiliupUploader"
    }

    async fn execute(&self) -> Result<StageOutcome, StageError> {
        let Some(tool_dir) = &self.settings.biliup_path else {
            info!("biliup path not configured, skipping upload");
            return Ok(StageOutcome::skipped("biliup path not configured"));
        };

        if !tokio::fs::metadata(tool_dir).await.is_ok_and(|m| m.is_dir()) {
            return Err(StageError::failed(format!(
                "biliup directory {} does not exist",
                tool_dir.display()
            )));
        }

        let binary = tool_dir.join(BILIUP_BINARY);
        Self::check_binary(&binary);

        info!(
            "Running {} upload -c {}",
            binary.display(),
            self.settings.config_file
        );
        let mut cmd = tokio_command(&binary);
        cmd.current_dir(tool_dir)
            .args(["upload", "-c", self.settings.config_file.as_str()]);

        let output = run_captured(&mut cmd).await.map_err(|e| {
            StageError::failed(format!("failed to start {}: {e}", binary.display()))
        })?;

        for line in output.stdout.iter().filter(|l| !l.trim().is_empty()) {
            info!(tool = "biliup", "{}", line);
        }
        for line in output.stderr.iter().filter(|l| !l.trim().is_empty()) {
            warn!(tool = "biliup", "{}", line);
        }

        if !output.success() {
            return Err(StageError::failed(describe_exit("biliup", &output)));
        }
        Ok(StageOutcome::completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn uploader(path: Option<PathBuf>) -> BiliupUploader {
        BiliupUploader::new(UploadSettings {
            biliup_path: path,
            config_file: "config.yaml".to_string(),
        })
    }

    #[tokio::test]
    async fn test_not_configured_is_skipped() {
        let outcome = uploader(None).execute().await.unwrap();
        assert!(matches!(outcome, StageOutcome::Skipped { reason } if reason.contains("not configured")));
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        let result = uploader(Some(temp.path().join("absent"))).execute().await;
        assert!(matches!(result, Err(StageError::Failed(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_fails() {
        let temp = TempDir::new().unwrap();
        let result = uploader(Some(temp.path().to_path_buf())).execute().await;
        assert!(matches!(result, Err(StageError::Failed(msg)) if msg.contains("failed to start")));
    }

    #[cfg(unix)]
    fn install_fake_biliup(dir: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let binary = dir.join(BILIUP_BINARY);
        std::fs::write(&binary, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_tool_directory() {
        let temp = TempDir::new().unwrap();
        // Succeeds only when started in its own directory with the expected args.
        install_fake_biliup(
            temp.path(),
            "[ -x ./biliup ] && [ \"$1 $2 $3\" = \"upload -c config.yaml\" ] || exit 9\necho uploaded",
        );

        let outcome = uploader(Some(temp.path().to_path_buf()))
            .execute()
            .await
            .unwrap();
        assert_eq!(outcome, StageOutcome::completed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_carries_code_and_stderr() {
        let temp = TempDir::new().unwrap();
        install_fake_biliup(temp.path(), "echo 'login expired' 1>&2\nexit 2");

        let err = uploader(Some(temp.path().to_path_buf()))
            .execute()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StageError::failed("biliup exited with 2: login expired")
        );
    }
}
