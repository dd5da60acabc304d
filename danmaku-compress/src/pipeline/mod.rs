//! Recording post-processing pipeline.
//!
//! The pipeline is responsible for:
//! - Running the prune, convert, encode and upload stages in order
//! - Applying per-stage abort/continue policy to failures
//! - Recording every run into a [`RunResult`]
//! - Admitting at most one run at a time process-wide

mod guard;
pub mod processors;
mod result;
mod runner;
mod stage;
mod status;

pub use guard::{BackgroundTaskGuard, RunHandle, Submission};
pub use result::{RecordLevel, RunRecorder, RunResult, RunStatus, WARNING_PREFIX, classify};
pub use runner::{PipelineRunner, StageSet};
pub use stage::{Stage, StageError, StageOutcome, StagePolicy, StageProcessor};
pub use status::{LastResultPolicy, RunSlot, StatusSnapshot, TaskStatusStore};
