//! DanmakuFactory processor for converting danmu XML to ASS subtitles.
//!
//! Walks the processing folder for `.xml` danmaku files and renders each to an
//! `.ass` file next to it. Files whose recording is still being written, and
//! files already converted, are left alone. A single bad file is logged and
//! skipped; only an unreadable folder or a missing converter fails the stage.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use process_utils::{run_captured, tokio_command};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::utils::{VIDEO_EXTENSIONS, describe_exit, has_extension};
use crate::Error;
use crate::config::ConvertSettings;
use crate::pipeline::{Stage, StageError, StageOutcome, StageProcessor};

/// Why an XML file was not converted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SkipReason {
    StillRecording(PathBuf),
    UpToDate,
}

pub struct DanmakuConverter {
    settings: ConvertSettings,
}

impl DanmakuConverter {
    pub fn new(settings: ConvertSettings) -> Self {
        Self { settings }
    }

    fn build_args(&self, xml: &Path, ass: &Path) -> Vec<String> {
        let s = &self.settings;
        vec![
            "-i".to_string(),
            xml.to_string_lossy().into_owned(),
            "-o".to_string(),
            ass.to_string_lossy().into_owned(),
            "-r".to_string(),
            format!("{}x{}", s.resolution_x, s.resolution_y),
            "-S".to_string(),
            s.font_size.to_string(),
            "--msgboxfontsize".to_string(),
            s.superchat_font_size.to_string(),
            "--ignore-warnings".to_string(),
        ]
    }

    /// Collect `.xml` files under `root`, sorted for stable processing order.
    async fn find_xml_files(root: &Path) -> Result<Vec<PathBuf>, StageError> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root) {
                let entry = match entry {
                    Ok(entry) => entry,
                    // Losing the root is fatal; a vanished subdirectory is not.
                    Err(e) if e.depth() == 0 => {
                        let source = e
                            .into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                        return Err(StageError::from(Error::io_path("scanning", &root, source)));
                    }
                    Err(e) => {
                        warn!("Skipping unreadable entry while scanning: {}", e);
                        continue;
                    }
                };
                if entry.file_type().is_file() && has_extension(entry.path(), "xml") {
                    files.push(entry.into_path());
                }
            }
            files.sort();
            Ok(files)
        })
        .await
        .map_err(|e| StageError::fault(format!("danmaku scan task failed: {e}")))?
    }

    async fn modified(path: &Path) -> Option<SystemTime> {
        tokio::fs::metadata(path).await.ok()?.modified().ok()
    }

    async fn skip_reason(&self, xml: &Path, ass: &Path) -> Option<SkipReason> {
        let now = SystemTime::now();
        for ext in VIDEO_EXTENSIONS {
            let video = xml.with_extension(ext);
            if let Some(mtime) = Self::modified(&video).await {
                let age = now.duration_since(mtime).unwrap_or_default();
                if age < self.settings.settle_time {
                    return Some(SkipReason::StillRecording(video));
                }
            }
        }

        match (Self::modified(xml).await, Self::modified(ass).await) {
            (Some(xml_time), Some(ass_time)) if ass_time >= xml_time => Some(SkipReason::UpToDate),
            _ => None,
        }
    }
}

#[async_trait]
impl StageProcessor for DanmakuConverter {
    fn stage(&self) -> Stage {
        Stage::Convert
    }

    fn name(&self) -> &'static str {
        "DanmakuConverter"
    }

    async fn execute(&self) -> Result<StageOutcome, StageError> {
        let folder = &self.settings.processing_folder;
        info!("Scanning {} for danmaku files", folder.display());

        let xml_files = Self::find_xml_files(folder).await?;
        if xml_files.is_empty() {
            info!("No danmaku XML files found");
            return Ok(StageOutcome::completed_with("no danmaku files found"));
        }
        info!("Found {} danmaku XML files", xml_files.len());

        let mut converted = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;

        for xml in &xml_files {
            let ass = xml.with_extension("ass");

            match self.skip_reason(xml, &ass).await {
                Some(SkipReason::StillRecording(video)) => {
                    info!(
                        "Skipping {}: {} is still being written",
                        xml.display(),
                        video.display()
                    );
                    skipped += 1;
                    continue;
                }
                Some(SkipReason::UpToDate) => {
                    debug!("Skipping {}: already converted", xml.display());
                    skipped += 1;
                    continue;
                }
                None => {}
            }

            let args = self.build_args(xml, &ass);
            debug!("DanmakuFactory args: {:?}", args);
            let mut cmd = tokio_command(&self.settings.binary_path);
            cmd.args(&args).env("LC_ALL", "C");

            let output = match run_captured(&mut cmd).await {
                Ok(output) => output,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StageError::failed(format!(
                        "danmaku converter '{}' not found",
                        self.settings.binary_path
                    )));
                }
                Err(e) => {
                    warn!("Failed to run converter for {}: {}", xml.display(), e);
                    failed += 1;
                    continue;
                }
            };

            if !output.success() {
                warn!(
                    "Conversion of {} failed: {}",
                    xml.display(),
                    describe_exit("DanmakuFactory", &output)
                );
                failed += 1;
                continue;
            }
            if !ass.exists() {
                warn!(
                    "DanmakuFactory reported success but {} was not created",
                    ass.display()
                );
                failed += 1;
                continue;
            }

            info!("Generated {}", ass.display());
            converted += 1;
        }

        Ok(StageOutcome::completed_with(format!(
            "converted {converted}, skipped {skipped}, failed {failed}"
        )))
    }
}
