//! Token-bucket admission gate shared by all workers of a tick.
//!
//! `acquire` never blocks: it either debits tokens and returns a zero wait, or
//! returns how long the caller must sleep before the tokens exist (and empties
//! the bucket). The caller owns the sleep so it can check cancellation around it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket; refill and debit happen under one lock.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Bucket refilling at `rate` tokens/sec, holding at most `capacity`, starting full.
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self::new_at(rate, capacity, Instant::now())
    }

    /// Bucket sized for a requests-per-second limit (capacity = one second of burst).
    pub fn per_second(max_rps: u32) -> Self {
        let rate = f64::from(max_rps.max(1));
        Self::new(rate, rate)
    }

    pub(crate) fn new_at(rate: f64, capacity: f64, now: Instant) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        let capacity = capacity.max(1.0);
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Take `n` tokens now, or report the wait until `n` tokens will be available.
    pub fn acquire(&self, n: u32) -> Duration {
        self.acquire_at(n, Instant::now())
    }

    pub(crate) fn acquire_at(&self, n: u32, now: Instant) -> Duration {
        let need = f64::from(n);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now.max(state.last_refill);
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);

        if need <= state.tokens {
            state.tokens -= need;
            return Duration::ZERO;
        }
        let deficit = need - state.tokens;
        state.tokens = 0.0;
        Duration::from_secs_f64(deficit / self.rate)
    }
}
