//! Retry and backoff policy.
//!
//! Classifies per-attempt outcomes (rate limited, forbidden, transport error,
//! permanent HTTP failure) and computes jittered exponential backoff so the
//! fetch path and the scheduler share one policy.

mod classify;
mod error;
mod policy;

pub use classify::{classify_status, classify_transport};
pub use error::TransportError;
pub use policy::{jittered, ErrorKind, RetryDecision, RetryPolicy};
