//! Bounded fetch worker pool.
//!
//! `C` workers pull indices from one shared cursor into the batch slice, so
//! slow points don't stall a static partition. Each worker checks cancellation,
//! claims an index, waits on the shared token bucket, re-checks, then runs
//! [`fetch_with_retry`]. Results flow back over a channel and are folded once
//! by the calling thread.

mod outcome;
mod single;

pub use outcome::{PointOutcome, PointResult, Sighting};
pub use single::fetch_with_retry;

use rand::Rng;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::aggregate::Aggregator;
use crate::control::CancellationToken;
use crate::grid::Coordinate;
use crate::job::Stats;
use crate::rate_limit::TokenBucket;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::url_model::UrlBuilder;

/// Upper bound of the random delay added to every rate-limit wait.
const ADMISSION_JITTER_MS: u64 = 50;

/// Everything a worker needs besides the points.
#[derive(Clone)]
pub struct FetchContext {
    pub transport: Arc<dyn Transport>,
    pub url: UrlBuilder,
    pub policy: RetryPolicy,
    pub id_field: String,
    pub limiter: Arc<TokenBucket>,
}

/// Result of running the pool over one slice.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Length of the settled prefix of the slice; the job cursor advances by this.
    pub processed: usize,
    /// Sightings from the settled prefix only.
    pub results: Aggregator,
    /// Counters from the settled prefix only.
    pub stats: Stats,
    /// Counters from every attempt made, including points that will be redone.
    pub observed: Stats,
    /// True if cancellation cut the batch short.
    pub stopped: bool,
}

/// Process `points` with up to `concurrency` workers. Returns once every worker has exited.
pub fn run_batch(
    points: &[Coordinate],
    concurrency: usize,
    ctx: &FetchContext,
    cancel: &CancellationToken,
) -> BatchReport {
    let count = points.len();
    if count == 0 {
        return BatchReport::default();
    }
    let next = Mutex::new(0usize);
    let (tx, rx) = mpsc::channel::<(usize, PointResult)>();
    let workers = concurrency.clamp(1, count);

    let mut slots: Vec<Option<PointResult>> = vec![None; count];
    std::thread::scope(|s| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            s.spawn(move || worker(points, next, ctx, cancel, tx));
        }
        drop(tx);
        for (index, res) in rx {
            slots[index] = Some(res);
        }
    });

    fold(points, slots, cancel.is_stopped())
}

fn worker(
    points: &[Coordinate],
    next: &Mutex<usize>,
    ctx: &FetchContext,
    cancel: &CancellationToken,
    tx: mpsc::Sender<(usize, PointResult)>,
) {
    let mut rng = rand::rng();
    loop {
        if cancel.is_stopped() {
            break;
        }
        let index = {
            let mut n = next.lock().unwrap_or_else(|e| e.into_inner());
            if *n >= points.len() {
                break;
            }
            *n += 1;
            *n - 1
        };

        let wait = ctx.limiter.acquire(1);
        if !wait.is_zero() {
            let jitter = Duration::from_millis(rng.random_range(0..=ADMISSION_JITTER_MS));
            if ctx.transport.sleep(wait + jitter, cancel).is_err() {
                let _ = tx.send((index, PointResult::stopped(Stats::default())));
                break;
            }
        }
        if cancel.is_stopped() {
            let _ = tx.send((index, PointResult::stopped(Stats::default())));
            break;
        }

        let res = match ctx.url.build(&points[index]) {
            Ok(url) => fetch_with_retry(
                ctx.transport.as_ref(),
                &url,
                &ctx.policy,
                &ctx.id_field,
                cancel,
                &mut rng,
            ),
            Err(reason) => {
                warn!(?reason, "cannot build request url");
                PointResult {
                    outcome: PointOutcome::BadUrl(reason),
                    stats: Stats {
                        fail: 1,
                        ..Stats::default()
                    },
                }
            }
        };
        if tx.send((index, res)).is_err() {
            break;
        }
    }
}

/// Fold per-point results. Only the contiguous settled prefix counts, so the
/// cursor never skips a point and never counts one twice.
fn fold(points: &[Coordinate], slots: Vec<Option<PointResult>>, stopped: bool) -> BatchReport {
    let mut report = BatchReport {
        stopped,
        ..BatchReport::default()
    };
    let mut in_prefix = true;
    for (i, slot) in slots.into_iter().enumerate() {
        let res = match slot {
            Some(r) => r,
            None => {
                in_prefix = false;
                continue;
            }
        };
        report.observed.add(&res.stats);
        if res.is_stopped() {
            in_prefix = false;
        }
        if !in_prefix {
            continue;
        }
        report.processed += 1;
        report.stats.add(&res.stats);
        if let PointOutcome::Fetched(Some(sighting)) = res.outcome {
            report
                .results
                .record(points[i], sighting.id, sighting.payload);
        }
    }
    if report.processed < points.len() {
        debug!(
            processed = report.processed,
            batch = points.len(),
            "batch cut short"
        );
        report.stopped = true;
    }
    report
}
