//! HTTP transport boundary.
//!
//! Everything that differs between execution environments (real network,
//! scripted test servers) sits behind [`Transport`]. The fetch logic above it
//! exists once.

mod easy;
mod parse;

pub use easy::CurlTransport;
pub use parse::{parse_headers, parse_retry_after};

use std::time::Duration;

use crate::control::{CancellationToken, Stopped};
use crate::retry::TransportError;

/// A completed HTTP exchange (any status).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u32,
    /// Parsed `Retry-After`, if the server sent one.
    pub retry_after: Option<Duration>,
    pub body: Vec<u8>,
}

/// Issue GETs and sleep, both interruptible by a cancellation token.
pub trait Transport: Send + Sync {
    /// Perform one GET. Must give up promptly once `cancel` fires.
    fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse, TransportError>;

    /// Sleep for `duration` unless `cancel` fires first.
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Stopped> {
        cancel.sleep(duration)
    }
}

#[cfg(test)]
pub(crate) mod mock;
