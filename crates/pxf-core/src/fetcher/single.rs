//! Fetch-with-retry for a single grid point.

use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

use super::outcome::{PointOutcome, PointResult, Sighting};
use crate::aggregate::extract_identifier;
use crate::control::CancellationToken;
use crate::job::Stats;
use crate::retry::{classify_status, classify_transport, jittered, ErrorKind, RetryDecision, RetryPolicy};
use crate::transport::Transport;

/// Ceiling applied to a server-provided `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// GET `url` until it settles: success, permanent failure, attempt cap, or stop.
pub fn fetch_with_retry<R: Rng + ?Sized>(
    transport: &dyn Transport,
    url: &str,
    policy: &RetryPolicy,
    id_field: &str,
    cancel: &CancellationToken,
    rng: &mut R,
) -> PointResult {
    let mut stats = Stats::default();
    let mut attempt = 0u32;
    loop {
        if cancel.is_stopped() {
            return PointResult::stopped(stats);
        }
        attempt += 1;

        let (kind, retry_after) = match transport.fetch(url, cancel) {
            Ok(resp) => {
                stats.attempts += 1;
                match classify_status(resp.status) {
                    None => {
                        stats.ok += 1;
                        return PointResult {
                            outcome: PointOutcome::Fetched(parse_sighting(&resp.body, id_field)),
                            stats,
                        };
                    }
                    Some(ErrorKind::Permanent(status)) => {
                        stats.fail += 1;
                        debug!(url, status, "permanent failure");
                        return PointResult {
                            outcome: PointOutcome::Failed { status },
                            stats,
                        };
                    }
                    Some(kind) => {
                        if kind == ErrorKind::RateLimited {
                            stats.rate_limited += 1;
                        } else {
                            stats.forbidden += 1;
                        }
                        (kind, resp.retry_after)
                    }
                }
            }
            Err(e) => match classify_transport(&e) {
                None => return PointResult::stopped(stats),
                Some(kind) => {
                    stats.attempts += 1;
                    stats.err += 1;
                    debug!(url, attempt, error = %e, "transport error");
                    (kind, None)
                }
            },
        };

        let delay = match policy.decide(attempt, kind) {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::NoRetry => {
                stats.fail += 1;
                warn!(url, attempts = attempt, ?kind, "giving up after max retries");
                return PointResult {
                    outcome: PointOutcome::MaxRetries { last: kind },
                    stats,
                };
            }
        };
        let mut wait = jittered(delay, kind, rng);
        if let Some(floor) = retry_after {
            wait = wait.max(floor.min(MAX_RETRY_AFTER));
        }
        debug!(url, attempt, ?kind, wait_ms = wait.as_millis() as u64, "backing off");
        if transport.sleep(wait, cancel).is_err() {
            return PointResult::stopped(stats);
        }
    }
}

/// Bodies that are not JSON are tolerated and contribute nothing.
fn parse_sighting(body: &[u8], id_field: &str) -> Option<Sighting> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let (id, payload) = extract_identifier(&value, id_field);
    Some(Sighting { id, payload })
}
