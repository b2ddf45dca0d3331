//! Classify HTTP status codes and transport errors into retry policy kinds.

use super::error::TransportError;
use super::policy::ErrorKind;

/// Classify an HTTP status. `None` means success (2xx).
pub fn classify_status(code: u32) -> Option<ErrorKind> {
    match code {
        200..=299 => None,
        429 => Some(ErrorKind::RateLimited),
        403 => Some(ErrorKind::Forbidden),
        other => Some(ErrorKind::Permanent(other)),
    }
}

/// Classify a transport error. `None` means the attempt was cancelled, not failed.
pub fn classify_transport(e: &TransportError) -> Option<ErrorKind> {
    match e {
        TransportError::Cancelled => None,
        TransportError::Curl(ce) if ce.is_aborted_by_callback() => None,
        TransportError::Curl(_) | TransportError::Other(_) => Some(ErrorKind::Transport),
    }
}
