//! Service layer module.
//!
//! Wires configuration, the pipeline, the scheduler and the API together and
//! owns their shared shutdown token.

pub mod container;

pub use container::ServiceContainer;
