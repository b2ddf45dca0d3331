//! Job model: per-job configuration, the durable job record, statistics,
//! run-state summary and progress snapshots.

mod config;
mod error;
mod types;

pub use config::JobConfig;
pub use error::ConfigError;
pub use types::*;
