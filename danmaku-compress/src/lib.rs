//! danmaku-compress library crate.
//!
//! Post-processes live recordings in four stages (prune, convert, encode,
//! upload) behind a single-flight guard, on a schedule and over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod pipeline;
pub mod scheduler;
pub mod services;

pub use error::{Error, Result};
