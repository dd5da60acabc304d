//! Stage definitions and the processor trait every stage implements.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One step of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prune,
    Convert,
    Encode,
    Upload,
}

impl Stage {
    /// Fixed execution order.
    pub const ORDER: [Stage; 4] = [Stage::Prune, Stage::Convert, Stage::Encode, Stage::Upload];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prune => "prune",
            Self::Convert => "convert",
            Self::Encode => "encode",
            Self::Upload => "upload",
        }
    }

    /// 1-based position in [`Stage::ORDER`].
    pub fn number(self) -> usize {
        match self {
            Self::Prune => 1,
            Self::Convert => 2,
            Self::Encode => 3,
            Self::Upload => 4,
        }
    }

    /// Human-readable description used in run messages.
    pub fn description(self) -> &'static str {
        match self {
            Self::Prune => "prune invalid backup recordings",
            Self::Convert => "convert danmaku (XML -> ASS)",
            Self::Encode => "burn subtitles into video (FLV + ASS -> MP4)",
            Self::Upload => "upload videos to Bilibili",
        }
    }

    /// A failed publish must not throw away a video that was already produced.
    pub fn policy(self) -> StagePolicy {
        match self {
            Self::Prune | Self::Convert | Self::Encode => StagePolicy::AbortOnError,
            Self::Upload => StagePolicy::ContinueOnError,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the runner does after a stage reports a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePolicy {
    AbortOnError,
    ContinueOnError,
}

/// Successful outcome of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage did its work. `summary` is appended to the completion message.
    Completed { summary: Option<String> },
    /// The stage chose not to run; recorded as a warning, never an error.
    Skipped { reason: String },
}

impl StageOutcome {
    pub fn completed() -> Self {
        Self::Completed { summary: None }
    }

    pub fn completed_with(summary: impl Into<String>) -> Self {
        Self::Completed {
            summary: Some(summary.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }
}

/// Errors a stage can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// Clean failure; recorded and handled per [`StagePolicy`].
    #[error("{0}")]
    Failed(String),
    /// Broke the stage contract; escapes the runner and becomes a critical failure.
    #[error("{0}")]
    Fault(String),
}

impl StageError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn fault(reason: impl Into<String>) -> Self {
        Self::Fault(reason.into())
    }
}

impl From<crate::Error> for StageError {
    fn from(err: crate::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

/// A single pipeline stage backed by an external tool or file-system work.
///
/// # Blocking
///
/// Implementations may run for many minutes (encoding). They must stay async
/// or move blocking work onto the blocking pool so the API keeps answering.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    /// The stage this processor implements.
    fn stage(&self) -> Stage;

    /// Processor name for logs.
    fn name(&self) -> &'static str;

    async fn execute(&self) -> std::result::Result<StageOutcome, StageError>;
}
