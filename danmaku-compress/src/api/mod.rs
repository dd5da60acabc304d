//! HTTP trigger surface.
//!
//! Provides endpoints for starting a pipeline run, polling its status,
//! checking liveness and adjusting the log filter.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
