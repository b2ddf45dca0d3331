use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// High-level classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 429.
    RateLimited,
    /// HTTP 403 (the remote uses it for soft bans as well as hard ones).
    Forbidden,
    /// Network-level failure (connection reset, DNS, timeout, etc.).
    Transport,
    /// Any other non-2xx status; not expected to be transient.
    Permanent(u32),
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Permanent(_))
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given (un-jittered) delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms.max(cfg.base_delay_ms)),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)`, capped at `max_delay`. `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Decide whether attempt number `attempt` (1-based) should be followed by another.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff(attempt))
    }
}

/// Spread a backoff so concurrent workers don't retry in lockstep.
///
/// Throttling responses get up to 100% extra; transport errors up to 200ms.
pub fn jittered<R: Rng + ?Sized>(delay: Duration, kind: ErrorKind, rng: &mut R) -> Duration {
    let max_extra_ms = match kind {
        ErrorKind::RateLimited | ErrorKind::Forbidden => delay.as_millis() as u64,
        ErrorKind::Transport | ErrorKind::Permanent(_) => 200,
    };
    if max_extra_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rng.random_range(0..=max_extra_ms))
}
