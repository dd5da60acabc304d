//! Run outcome model and the recorder that builds it.
//!
//! The recorder owns exactly one [`RunResult`] and performs no I/O; the
//! runner mirrors recorded entries to the log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix marking warnings inside the shared `messages` list.
pub const WARNING_PREFIX: &str = "WARN: ";

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Success,
    PartialFailure,
    Failure,
    CriticalFailure,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failure => "failure",
            Self::CriticalFailure => "critical_failure",
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive a run status from the two facts that determine it.
///
/// `had_messages_before_first_error` is only meaningful when `has_errors`
/// is true. A run without errors classifies as `Success`; callers keep the
/// status `Pending` until the run is finalized.
pub fn classify(had_messages_before_first_error: bool, has_errors: bool) -> RunStatus {
    match (has_errors, had_messages_before_first_error) {
        (false, _) => RunStatus::Success,
        (true, true) => RunStatus::PartialFailure,
        (true, false) => RunStatus::Failure,
    }
}

/// Severity of a recorded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLevel {
    Info,
    Warning,
    Error,
}

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Informational and warning entries in emission order.
    pub messages: Vec<String>,
    /// Error entries in emission order.
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunResult {
    /// Result for a run that faulted outside the stage protocol.
    pub fn critical(run_id: Uuid, started_at: DateTime<Utc>, fault: impl Into<String>) -> Self {
        Self {
            run_id,
            status: RunStatus::CriticalFailure,
            messages: Vec::new(),
            errors: vec![fault.into()],
            started_at,
            finished_at: Some(Utc::now()),
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter_map(|m| m.strip_prefix(WARNING_PREFIX))
    }
}

/// Accumulates entries for one run and keeps its status current.
#[derive(Debug)]
pub struct RunRecorder {
    result: RunResult,
    messages_before_first_error: Option<bool>,
}

impl RunRecorder {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            result: RunResult {
                run_id,
                status: RunStatus::Pending,
                messages: Vec::new(),
                errors: Vec::new(),
                started_at: Utc::now(),
                finished_at: None,
            },
            messages_before_first_error: None,
        }
    }

    pub fn record(&mut self, level: RecordLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            RecordLevel::Info => self.result.messages.push(message),
            RecordLevel::Warning => self
                .result
                .messages
                .push(format!("{WARNING_PREFIX}{message}")),
            RecordLevel::Error => {
                // Captured once: later messages must not re-grade the run.
                let had_messages = *self
                    .messages_before_first_error
                    .get_or_insert(!self.result.messages.is_empty());
                self.result.errors.push(message);
                self.result.status = classify(had_messages, true);
            }
        }
    }

    pub fn status(&self) -> RunStatus {
        self.result.status
    }

    pub fn has_errors(&self) -> bool {
        !self.result.errors.is_empty()
    }

    pub fn run_id(&self) -> Uuid {
        self.result.run_id
    }

    /// Close the run. A run with no errors becomes `Success` only here.
    pub fn finish(mut self) -> RunResult {
        if self.result.errors.is_empty() {
            self.result.status = classify(false, false);
        }
        self.result.finished_at = Some(Utc::now());
        self.result
    }
}
