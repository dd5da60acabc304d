//! Periodic pipeline trigger.
//!
//! The scheduler submits a run through the [`BackgroundTaskGuard`] on a fixed
//! interval. A tick that lands while a run is in flight is dropped, never
//! queued.
//!
//! [`BackgroundTaskGuard`]: crate::pipeline::BackgroundTaskGuard

mod service;

pub use service::{PipelineScheduler, SchedulerConfig, TickOutcome};
