use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::JobId;

/// Where the scheduler is in a job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Running,
    Finalizing,
    Cancelled,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No persisted job (stale trigger).
    Idle,
    /// More points remain; tick again after `delay`.
    Continue { delay: Duration },
    /// Job drained and exported; state cleared.
    Finished { export: PathBuf },
    /// A stop was observed; no further ticks.
    Cancelled,
    /// The runner was interrupted. The job stays persisted at its last checkpoint.
    Interrupted,
}

/// Answer to a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartResponse {
    pub fn started(job_id: JobId, total: usize) -> Self {
        Self {
            ok: true,
            job_id: Some(job_id),
            total: Some(total),
            error: None,
        }
    }

    pub fn already_running(job_id: JobId) -> Self {
        Self {
            ok: false,
            job_id: Some(job_id),
            total: None,
            error: Some("already-running".to_string()),
        }
    }
}

/// Answer to a stop request. Always `ok`; `filename` is set only for the call
/// that exported the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}
