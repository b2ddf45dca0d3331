//! Scripted in-memory transport for unit tests.

use std::sync::Mutex;
use std::time::Duration;

use super::{HttpResponse, Transport};
use crate::control::{CancellationToken, Stopped};
use crate::retry::TransportError;

type Responder = Box<dyn Fn(&str) -> Result<HttpResponse, TransportError> + Send + Sync>;

/// Answers every GET through a closure; sleeps are recorded, not slept.
pub(crate) struct ScriptedTransport {
    respond: Responder,
    pub calls: Mutex<Vec<String>>,
    pub sleeps: Mutex<Vec<Duration>>,
}

impl ScriptedTransport {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Every GET answers 200 with `{"paintedBy":{"id":"<blockX>-<blockY>-<x>-<y>"}}`.
    pub fn unique_ids() -> Self {
        Self::new(|url| {
            let (bx, by, x, y) = coords_of(url);
            Ok(json(
                200,
                &format!(r#"{{"paintedBy":{{"id":"{}-{}-{}-{}"}}}}"#, bx, by, x, y),
            ))
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse, TransportError> {
        if cancel.is_stopped() {
            return Err(TransportError::Cancelled);
        }
        self.calls.lock().unwrap().push(url.to_string());
        (self.respond)(url)
    }

    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Stopped> {
        self.sleeps.lock().unwrap().push(duration);
        cancel.check()
    }
}

/// Template whose URLs [`coords_of`] can decode.
pub(crate) const TEST_TEMPLATE: &str = "http://mock.test/p/{blockX}/{blockY}/{lx}/{ly}";

/// Decode `(blockX, blockY, x, y)` from a URL built with [`TEST_TEMPLATE`].
pub(crate) fn coords_of(url: &str) -> (i64, i64, i64, i64) {
    let parts: Vec<i64> = url
        .trim_start_matches("http://mock.test/p/")
        .split('/')
        .map(|p| p.parse().unwrap())
        .collect();
    (parts[0], parts[1], parts[2], parts[3])
}

pub(crate) fn json(status: u32, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        retry_after: None,
        body: body.as_bytes().to_vec(),
    }
}
