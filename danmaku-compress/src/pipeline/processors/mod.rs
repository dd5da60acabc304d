//! Stage processors backed by the file system and external tools.

mod ass_burnin;
mod danmaku_factory;
mod prune;
mod upload;
mod utils;

use std::sync::Arc;

pub use ass_burnin::AssBurnIn;
pub use danmaku_factory::DanmakuConverter;
pub use prune::BackupPruner;
pub use upload::BiliupUploader;

use crate::config::AppConfig;
use crate::pipeline::StageSet;

/// Build the production processors from configuration.
pub fn build_stage_set(config: &AppConfig) -> StageSet {
    StageSet {
        prune: Arc::new(BackupPruner::new(config.prune.clone())),
        convert: Arc::new(DanmakuConverter::new(config.convert.clone())),
        encode: Arc::new(AssBurnIn::new(config.encode.clone())),
        upload: Arc::new(BiliupUploader::new(config.upload.clone())),
    }
}
