//! Adaptive throttle-down driven by the 429/403 ratio.
//!
//! One-directional: concurrency and RPS only ever shrink within a job.

use std::time::Duration;
use tracing::warn;

use crate::config::SchedulerConfig;
use crate::job::{Job, Stats};

/// Longest extra cooldown inserted before the next tick.
const MAX_COOLDOWN: Duration = Duration::from_secs(30);

/// Cooldown per unit of throttled ratio (a ratio of 0.25 earns 20s).
const COOLDOWN_PER_RATIO_MS: f64 = 80_000.0;

/// What the throttle decided after a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleDecision {
    pub ratio: f64,
    /// True if concurrency or RPS were lowered.
    pub reduced: bool,
    /// Extra wait before the next tick.
    pub cooldown: Option<Duration>,
}

/// Inspect this tick's observed counters and adjust `job` in place.
pub fn apply(job: &mut Job, observed: &Stats, cfg: &SchedulerConfig) -> ThrottleDecision {
    let ratio = observed.throttled_ratio();
    let mut reduced = false;
    if ratio > cfg.throttle_ratio {
        let concurrency = shrink(job.concurrency as f64, cfg.throttle_factor) as usize;
        let max_rps = shrink(f64::from(job.max_rps), cfg.throttle_factor) as u32;
        reduced = concurrency < job.concurrency || max_rps < job.max_rps;
        if reduced {
            warn!(
                job_id = job.id,
                ratio,
                concurrency_from = job.concurrency,
                concurrency_to = concurrency,
                rps_from = job.max_rps,
                rps_to = max_rps,
                "throttled responses above threshold, slowing down"
            );
        }
        job.concurrency = concurrency.min(job.concurrency);
        job.max_rps = max_rps.min(job.max_rps);
    }
    let cooldown = if ratio > cfg.cooldown_ratio {
        Some(cooldown_for(ratio))
    } else {
        None
    };
    ThrottleDecision {
        ratio,
        reduced,
        cooldown,
    }
}

/// `min(30s, ratio * 80s)`.
pub fn cooldown_for(ratio: f64) -> Duration {
    let ms = (ratio.clamp(0.0, 1.0) * COOLDOWN_PER_RATIO_MS) as u64;
    Duration::from_millis(ms).min(MAX_COOLDOWN)
}

fn shrink(value: f64, factor: f64) -> f64 {
    let factor = if factor > 0.0 && factor < 1.0 { factor } else { 0.65 };
    (value * factor).floor().max(1.0)
}
