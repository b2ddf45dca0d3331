use serde_json::Value;

use crate::job::Stats;
use crate::retry::ErrorKind;

/// What a successful response contributed to the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub id: Option<String>,
    pub payload: Option<Value>,
}

/// Final outcome for one grid point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointOutcome {
    /// 2xx. `None` when the body was not JSON.
    Fetched(Option<Sighting>),
    /// Non-retryable HTTP status.
    Failed { status: u32 },
    /// Retryable failures until the attempt cap.
    MaxRetries { last: ErrorKind },
    /// The request URL could not be built.
    BadUrl(String),
    /// Cancelled before the point settled; not a failure.
    Stopped,
}

/// Outcome plus the counters accumulated while reaching it.
#[derive(Debug, Clone, PartialEq)]
pub struct PointResult {
    pub outcome: PointOutcome,
    pub stats: Stats,
}

impl PointResult {
    pub fn stopped(stats: Stats) -> Self {
        Self {
            outcome: PointOutcome::Stopped,
            stats,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.outcome, PointOutcome::Stopped)
    }
}
