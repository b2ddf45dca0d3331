//! Durable job state (SQLite via sqlx).
//!
//! A small key/value table holds JSON for the run-state summary, the full job,
//! the stop flag and the latest progress snapshot, each readable on its own so
//! observers can poll without loading the point list. A second table records
//! which jobs have had their stop side effects performed.

mod db;
mod state;

pub use db::JobStore;
pub use state::StopRequest;

#[cfg(test)]
pub(crate) use db::open_memory;
