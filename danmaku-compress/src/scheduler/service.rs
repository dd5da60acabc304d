use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DEFAULT_SCHEDULE_INTERVAL_SECS;
use crate::pipeline::{BackgroundTaskGuard, Submission};

/// Configuration for the periodic trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Fire once immediately instead of waiting a full interval.
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SCHEDULE_INTERVAL_SECS),
            run_on_start: true,
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Submitted(Uuid),
    SkippedBusy,
}

pub struct PipelineScheduler {
    guard: Arc<BackgroundTaskGuard>,
    config: SchedulerConfig,
}

impl PipelineScheduler {
    pub fn new(guard: Arc<BackgroundTaskGuard>, config: SchedulerConfig) -> Self {
        Self { guard, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Submit one run if the guard is idle.
    pub fn fire(&self) -> TickOutcome {
        match self.guard.submit() {
            Submission::Accepted(handle) => {
                info!(run_id = %handle.run_id(), "Scheduled pipeline run submitted");
                TickOutcome::Submitted(handle.run_id())
            }
            Submission::Busy => {
                debug!("Pipeline already running, skipping scheduled tick");
                TickOutcome::SkippedBusy
            }
        }
    }

    /// Start the tick loop. It exits when `cancellation_token` is cancelled.
    ///
    /// Cancelling stops future ticks only; a run already in flight continues.
    pub fn start(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.interval;
            let first = if self.config.run_on_start {
                tokio::time::Instant::now()
            } else {
                tokio::time::Instant::now() + period
            };
            let mut ticker = interval_at(first, period);
            // A run longer than the period must not cause a burst of catch-up ticks.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "Pipeline scheduler started (interval: {}s)",
                period.as_secs()
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Pipeline scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.fire();
                    }
                }
            }
        })
    }
}
