//! Single-flight admission control in front of the pipeline runner.

use std::any::Any;
use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};
use uuid::Uuid;

use super::result::RunResult;
use super::runner::PipelineRunner;
use super::status::{StatusSnapshot, TaskStatusStore};

/// Answer to a run request.
#[derive(Debug)]
pub enum Submission {
    /// The run was admitted and is executing in the background.
    Accepted(RunHandle),
    /// Another run is in flight; nothing was changed.
    Busy,
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Handle to an admitted run.
///
/// Dropping the handle does not cancel the run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    task: JoinHandle<RunResult>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wait for the run to finish and return the published result.
    pub async fn wait(self) -> RunResult {
        match self.task.await {
            Ok(result) => result,
            // The slot was released by its drop guard; mirror what it published.
            Err(e) => RunResult::critical(
                self.run_id,
                chrono::Utc::now(),
                format!("run task ended abnormally: {e}"),
            ),
        }
    }
}

pub struct BackgroundTaskGuard {
    runner: Arc<PipelineRunner>,
    store: Arc<TaskStatusStore>,
}

impl BackgroundTaskGuard {
    pub fn new(runner: Arc<PipelineRunner>, store: Arc<TaskStatusStore>) -> Self {
        Self { runner, store }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.store.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.store.is_running()
    }

    /// Start a pipeline run unless one is already in flight.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self) -> Submission {
        let run_id = Uuid::new_v4();
        let Some(slot) = self.store.try_begin(run_id) else {
            return Submission::Busy;
        };

        info!(%run_id, "Background run accepted");
        let runner = Arc::clone(&self.runner);

        let task = tokio::spawn(async move {
            // The runner gets its own task so a panic surfaces here as a
            // JoinError instead of tearing down the task that owns the slot.
            let outcome = tokio::spawn(async move { runner.run_with_id(run_id).await }).await;

            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(fault)) => {
                    error!(%run_id, "Unhandled error while running pipeline: {}", fault);
                    RunResult::critical(
                        run_id,
                        slot.started_at(),
                        format!("unhandled error: {fault}"),
                    )
                }
                Err(join_error) => {
                    let reason = describe_join_error(join_error);
                    error!(%run_id, "Pipeline task crashed: {}", reason);
                    RunResult::critical(
                        run_id,
                        slot.started_at(),
                        format!("unhandled error: {reason}"),
                    )
                }
            };

            info!(%run_id, status = %result.status, "Background run finished");
            slot.complete(result)
        });

        Submission::Accepted(RunHandle { run_id, task })
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("panicked: {}", panic_message(err.into_panic()))
    } else {
        "task was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
