//! Batch scheduler.
//!
//! Drives a job through `Idle → Scheduled → Running → {Scheduled | Finalizing | Cancelled}`:
//! start generates and persists the job, each tick drains one slice through the
//! worker pool and checkpoints, and the job either reschedules, finalizes
//! (full export, state cleared) or is cancelled (capped snapshot, state cleared
//! by whichever path observed the stop first).

mod controller;
mod guard;
mod run;
mod start;
mod state;
mod stop;
mod tick;

pub use controller::JobController;
pub use state::{SchedulerState, StartResponse, StopResponse, TickOutcome};

#[cfg(test)]
mod tests;
