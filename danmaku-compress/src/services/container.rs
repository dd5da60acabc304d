//! Service container for dependency injection.
//!
//! The ServiceContainer holds references to all application services
//! and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::api::{ApiServer, AppState};
use crate::config::AppConfig;
use crate::logging::LoggingConfig;
use crate::pipeline::processors::build_stage_set;
use crate::pipeline::{BackgroundTaskGuard, PipelineRunner, StageSet, TaskStatusStore};
use crate::scheduler::{PipelineScheduler, SchedulerConfig};

/// Default time to wait for an in-flight run at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll period while waiting for an in-flight run to drain.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ServiceContainer {
    config: AppConfig,
    /// Single-flight gate shared by the scheduler, the API and the CLI.
    pub guard: Arc<BackgroundTaskGuard>,
    logging_config: Option<Arc<LoggingConfig>>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build the production services from configuration.
    pub fn new(config: AppConfig) -> Result<Self> {
        let stages = build_stage_set(&config);
        Self::with_stages(config, stages)
    }

    /// Build the services around a custom set of stage processors.
    pub fn with_stages(config: AppConfig, stages: StageSet) -> Result<Self> {
        let runner = Arc::new(PipelineRunner::new(stages)?);
        let store = Arc::new(TaskStatusStore::new(config.last_result_policy));
        let guard = Arc::new(BackgroundTaskGuard::new(runner, store));

        Ok(Self {
            config,
            guard,
            logging_config: None,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Expose runtime filter control through the API.
    pub fn with_logging_config(mut self, logging_config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(logging_config);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start the scheduler and log retention.
    ///
    /// Returns the scheduler task when scheduling is enabled.
    pub fn start_background_services(&self) -> Option<JoinHandle<()>> {
        if let Some(logging_config) = &self.logging_config {
            logging_config.start_retention_cleanup(self.cancellation_token.clone());
        }

        match self.config.schedule_interval {
            Some(interval) => {
                let scheduler = PipelineScheduler::new(
                    Arc::clone(&self.guard),
                    SchedulerConfig::default().with_interval(interval),
                );
                Some(scheduler.start(self.cancellation_token.clone()))
            }
            None => {
                info!("Periodic scheduling disabled");
                None
            }
        }
    }

    /// HTTP server sharing this container's guard and shutdown token.
    pub fn api_server(&self) -> ApiServer {
        let mut state = AppState::new(Arc::clone(&self.guard));
        if let Some(logging_config) = &self.logging_config {
            state = state.with_logging_config(Arc::clone(logging_config));
        }
        ApiServer::new(self.config.api.clone(), state)
            .with_cancel_token(self.cancellation_token.clone())
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> bool {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop background services and wait up to `timeout` for an in-flight run.
    ///
    /// Runs are never cancelled. Returns `false` if a run was still going
    /// when the timeout expired.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> bool {
        info!("Shutting down services (timeout: {:?})", timeout);
        self.cancellation_token.cancel();

        let guard = Arc::clone(&self.guard);
        let drained = tokio::time::timeout(timeout, async move {
            while guard.is_running() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if drained {
            info!("Services shut down");
        } else {
            let run_id = self.guard.status().current_run_id;
            warn!(?run_id, "Shutdown timeout reached with a pipeline run still in flight");
        }
        drained
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::pipeline::{Stage, StageError, StageOutcome, StageProcessor, Submission};

    struct Gated {
        stage: Stage,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl StageProcessor for Gated {
        fn stage(&self) -> Stage {
            self.stage
        }

        fn name(&self) -> &'static str {
            "Gated"
        }

        async fn execute(&self) -> std::result::Result<StageOutcome, StageError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(StageOutcome::completed())
        }
    }

    fn container(gate: Option<Arc<Notify>>) -> ServiceContainer {
        let config = AppConfig::from_lookup(|key| match key {
            "SCHEDULE_INTERVAL_SECS" => Some("0".to_string()),
            _ => None,
        })
        .unwrap();
        let stages = StageSet {
            prune: Arc::new(Gated {
                stage: Stage::Prune,
                gate,
            }),
            convert: Arc::new(Gated {
                stage: Stage::Convert,
                gate: None,
            }),
            encode: Arc::new(Gated {
                stage: Stage::Encode,
                gate: None,
            }),
            upload: Arc::new(Gated {
                stage: Stage::Upload,
                gate: None,
            }),
        };
        ServiceContainer::with_stages(config, stages).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_scheduler_is_not_started() {
        let container = container(None);
        assert!(container.start_background_services().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_run() {
        let gate = Arc::new(Notify::new());
        let container = container(Some(Arc::clone(&gate)));
        assert!(matches!(container.guard.submit(), Submission::Accepted(_)));

        assert!(!container.shutdown_with_timeout(Duration::from_millis(50)).await);
        assert!(container.is_shutting_down());
        assert!(container.guard.is_running());

        gate.notify_one();
        assert!(container.shutdown_with_timeout(Duration::from_secs(5)).await);
        assert!(!container.guard.is_running());
    }
}
