//! Transport-level error type for retry classification.

use std::fmt;

/// Error returned by a single HTTP attempt before any status is known.
#[derive(Debug)]
pub enum TransportError {
    /// Curl reported an error (timeout, connection, DNS, etc.).
    Curl(curl::Error),
    /// The transfer was aborted because the cancellation token fired.
    Cancelled,
    /// Any other transport failure (used by non-curl transports).
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Curl(e) => write!(f, "{}", e),
            TransportError::Cancelled => write!(f, "transfer cancelled"),
            TransportError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Curl(e) => Some(e),
            TransportError::Cancelled | TransportError::Other(_) => None,
        }
    }
}

impl From<curl::Error> for TransportError {
    fn from(e: curl::Error) -> Self {
        TransportError::Curl(e)
    }
}
