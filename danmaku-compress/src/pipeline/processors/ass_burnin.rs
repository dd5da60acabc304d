//! ASS burn-in processor (renders `.ass` subtitles into video frames).
//!
//! Pairs every `.flv` in the processing folder with the `.ass` of the same
//! stem and re-encodes it to `<stem>.mp4` with the subtitles burned in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use process_utils::{run_captured, tokio_command};
use tokio::fs;
use tracing::{debug, info, warn};

use super::utils::{describe_exit, escape_filter_path, file_stem, has_extension};
use crate::Error;
use crate::config::EncodeSettings;
use crate::pipeline::{Stage, StageError, StageOutcome, StageProcessor};

/// A recording and its rendered subtitles.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EncodeJob {
    video: PathBuf,
    subtitles: PathBuf,
    output: PathBuf,
}

enum EncodePlan {
    Jobs(Vec<EncodeJob>),
    Nothing(&'static str),
}

pub struct AssBurnIn {
    settings: EncodeSettings,
}

impl AssBurnIn {
    pub fn new(settings: EncodeSettings) -> Self {
        Self { settings }
    }

    fn make_subtitles_filter(ass_path: &Path) -> String {
        format!(
            "ass=filename='{}'",
            escape_filter_path(&ass_path.to_string_lossy())
        )
    }

    fn build_ffmpeg_args(&self, job: &EncodeJob) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec!["-hide_banner".to_string(), "-nostats".to_string()];
        if let Some(hwaccel) = &s.hwaccel {
            args.extend(["-hwaccel".to_string(), hwaccel.clone()]);
        }
        args.extend([
            "-i".to_string(),
            job.video.to_string_lossy().into_owned(),
            "-vf".to_string(),
            Self::make_subtitles_filter(&job.subtitles),
            "-c:v".to_string(),
            s.video_codec.clone(),
            "-preset".to_string(),
            s.preset.clone(),
            "-global_quality".to_string(),
            s.global_quality.to_string(),
            "-c:a".to_string(),
            s.audio_codec.clone(),
            "-y".to_string(),
            job.output.to_string_lossy().into_owned(),
        ]);
        args
    }

    /// List the folder and pair videos with subtitles by stem.
    async fn plan(&self) -> Result<EncodePlan, StageError> {
        let dir = &self.settings.processing_folder;
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| Error::io_path("reading directory", dir, e))?;

        let mut videos = Vec::new();
        let mut subtitles: HashMap<String, PathBuf> = HashMap::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(Error::io_path("reading directory", dir, e).into()),
            };
            let path = entry.path();
            if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
                continue;
            }
            if has_extension(&path, "flv") {
                videos.push(path);
            } else if has_extension(&path, "ass") {
                if let Some(stem) = file_stem(&path) {
                    subtitles.insert(stem, path);
                }
            }
        }

        if videos.is_empty() {
            return Ok(EncodePlan::Nothing("no recordings to encode"));
        }
        if subtitles.is_empty() {
            return Ok(EncodePlan::Nothing("no subtitle files to burn in"));
        }

        videos.sort();
        let mut jobs = Vec::new();
        for video in videos {
            let Some(stem) = file_stem(&video) else {
                continue;
            };
            match subtitles.remove(&stem) {
                Some(ass) => jobs.push(EncodeJob {
                    output: dir.join(format!("{stem}.mp4")),
                    video,
                    subtitles: ass,
                }),
                None => warn!("No subtitles for {}, skipping", video.display()),
            }
        }
        Ok(EncodePlan::Jobs(jobs))
    }

    async fn remove_sources(job: &EncodeJob) {
        for path in [&job.video, &job.subtitles] {
            match fs::remove_file(path).await {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

#[async_trait]
impl StageProcessor for AssBurnIn {
    fn stage(&self) -> Stage {
        Stage::Encode
    }

    fn name(&self) -> &'static str {
        "AssBurnIn"
    }

    async fn execute(&self) -> Result<StageOutcome, StageError> {
        let jobs = match self.plan().await? {
            EncodePlan::Jobs(jobs) => jobs,
            EncodePlan::Nothing(note) => {
                info!("Nothing to encode: {}", note);
                return Ok(StageOutcome::completed_with(note));
            }
        };

        let total = jobs.len();
        for (idx, job) in jobs.iter().enumerate() {
            info!(
                "Encoding {}/{}: {} -> {}",
                idx + 1,
                total,
                job.video.display(),
                job.output.display()
            );

            let args = self.build_ffmpeg_args(job);
            debug!("ffmpeg args: {:?}", args);
            let mut cmd = tokio_command(&self.settings.ffmpeg_path);
            cmd.args(&args);

            let output = run_captured(&mut cmd).await.map_err(|e| {
                StageError::failed(format!(
                    "failed to start '{}': {e}",
                    self.settings.ffmpeg_path
                ))
            })?;
            if !output.success() {
                return Err(StageError::failed(format!(
                    "encoding {} failed: {}",
                    job.video.display(),
                    describe_exit("ffmpeg", &output)
                )));
            }

            info!(
                "Encoded {} in {:.1}s",
                job.output.display(),
                output.duration.as_secs_f64()
            );
            if !self.settings.preserve_sources {
                Self::remove_sources(job).await;
            }
        }

        Ok(StageOutcome::completed_with(format!("encoded {total} videos")))
    }
}
