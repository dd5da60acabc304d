//! Environment-sourced application configuration.
//!
//! Values come from the process environment (after `.env` is loaded by
//! `main`). Unset variables fall back to defaults; set but malformed values
//! are configuration errors.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::pipeline::LastResultPolicy;
use crate::{Error, Result};

/// Default backup and processing directory of the reference deployment.
pub const DEFAULT_WORK_DIR: &str = "/vol1/1000/biliup/backup";

/// Default biliup-rs install directory.
pub const DEFAULT_BILIUP_PATH: &str = "/vol1/1000/biliup/biliup-rs";

/// Default scheduler period (15 minutes).
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 15 * 60;

/// Settings for removing aborted backup recordings.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneSettings {
    pub backup_folder: PathBuf,
    /// Recordings smaller than this many MiB are removed.
    pub min_size_mb: f64,
    /// Only files whose name starts with this prefix are considered.
    pub name_prefix: Option<String>,
}

/// Settings for danmaku XML to ASS conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertSettings {
    pub processing_folder: PathBuf,
    pub binary_path: String,
    pub font_size: u32,
    pub superchat_font_size: u32,
    pub resolution_x: u32,
    pub resolution_y: u32,
    /// A companion video modified within this window is still being recorded.
    pub settle_time: Duration,
}

/// Settings for burning ASS subtitles into recordings.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub processing_folder: PathBuf,
    pub ffmpeg_path: String,
    pub hwaccel: Option<String>,
    pub video_codec: String,
    pub preset: String,
    pub global_quality: u32,
    pub audio_codec: String,
    /// Keep the `.flv` and `.ass` inputs after a successful encode.
    pub preserve_sources: bool,
}

/// Settings for publishing through biliup-rs.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSettings {
    /// Directory containing the `biliup` binary; `None` disables uploads.
    pub biliup_path: Option<PathBuf>,
    /// Config file name, relative to `biliup_path`.
    pub config_file: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub prune: PruneSettings,
    pub convert: ConvertSettings,
    pub encode: EncodeSettings,
    pub upload: UploadSettings,
    /// `None` disables the periodic scheduler.
    pub schedule_interval: Option<Duration>,
    pub last_result_policy: LastResultPolicy,
    pub api: ApiServerConfig,
    pub log_dir: PathBuf,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let backup_folder = env.path("BACKUP_FOLDER", DEFAULT_WORK_DIR);
        let processing_folder = env.path("PROCESSING_FOLDER", DEFAULT_WORK_DIR);

        let min_size_mb: f64 = env.parse("MIN_BACKUP_SIZE_MB", 1.0)?;
        if !min_size_mb.is_finite() || min_size_mb < 0.0 {
            return Err(Error::config(format!(
                "MIN_BACKUP_SIZE_MB must be a non-negative number, got {min_size_mb}"
            )));
        }

        let prune = PruneSettings {
            backup_folder,
            min_size_mb,
            name_prefix: env.non_empty("BACKUP_NAME_PREFIX"),
        };

        let convert = ConvertSettings {
            processing_folder: processing_folder.clone(),
            binary_path: env.string("DANMAKU_FACTORY_PATH", "DanmakuFactory"),
            font_size: env.parse("DANMAKU_FONT_SIZE", 38)?,
            superchat_font_size: env.parse("DANMAKU_SC_FONT_SIZE", 30)?,
            resolution_x: env.parse("DANMAKU_RESOLUTION_X", 1920)?,
            resolution_y: env.parse("DANMAKU_RESOLUTION_Y", 1080)?,
            settle_time: Duration::from_secs(env.parse("RECORDING_SETTLE_SECS", 60)?),
        };

        let encode = EncodeSettings {
            processing_folder,
            ffmpeg_path: env.string("FFMPEG_PATH", "ffmpeg"),
            hwaccel: match env.raw("ENCODE_HWACCEL") {
                Some(v) if v.trim().is_empty() || v.trim().eq_ignore_ascii_case("none") => None,
                Some(v) => Some(v.trim().to_string()),
                None => Some("vaapi".to_string()),
            },
            video_codec: env.string("ENCODE_VIDEO_CODEC", "h264_qsv"),
            preset: env.string("ENCODE_PRESET", "veryfast"),
            global_quality: env.parse("ENCODE_GLOBAL_QUALITY", 22)?,
            audio_codec: env.string("ENCODE_AUDIO_CODEC", "copy"),
            preserve_sources: env.flag("PRESERVE_SOURCES", false)?,
        };

        // Set-but-empty means "not configured", which skips the upload stage.
        let biliup_path = match env.raw("BILIUP_RS_PATH") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(PathBuf::from(v.trim())),
            None => Some(PathBuf::from(DEFAULT_BILIUP_PATH)),
        };
        let upload = UploadSettings {
            biliup_path,
            config_file: env.string("BILIUP_CONFIG_FILE", "config.yaml"),
        };

        let interval_secs: u64 =
            env.parse("SCHEDULE_INTERVAL_SECS", DEFAULT_SCHEDULE_INTERVAL_SECS)?;
        let schedule_interval = (interval_secs > 0).then(|| Duration::from_secs(interval_secs));

        let last_result_policy = match env.non_empty("LAST_RESULT_POLICY") {
            Some(v) => v.parse().map_err(Error::config)?,
            None => LastResultPolicy::default(),
        };

        let mut api = ApiServerConfig::default();
        if let Some(bind_address) = env.non_empty("API_BIND_ADDRESS") {
            api.bind_address = bind_address;
        }
        api.port = env.parse("API_PORT", api.port)?;

        Ok(Self {
            prune,
            convert,
            encode,
            upload,
            schedule_interval,
            last_result_policy,
            api,
            log_dir: env.path("LOG_DIR", "logs"),
        })
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.non_empty(key).unwrap_or_else(|| default.to_string())
    }

    fn path(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.string(key, default))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.non_empty(key) {
            Some(v) => v
                .parse()
                .map_err(|e| Error::config(format!("invalid value for {key} ('{v}'): {e}"))),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.non_empty(key) {
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Error::config(format!(
                    "invalid value for {key} ('{v}'): expected true or false"
                ))),
            },
            None => Ok(default),
        }
    }
}
