//! Cancellation channel.
//!
//! A [`CancellationToken`] is passed explicitly into the scheduler, the worker
//! pool and the transport. Stopping is idempotent and one-way; sleeps taken
//! through the token wake as soon as it fires, and registered callbacks (e.g.
//! aborting an in-flight transfer) run exactly once. Cross-process visibility
//! comes from the persisted stop flag in the job store and the control socket.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Returned by any operation that observed a stop request.
/// Not a failure: never retried and never counted in failure statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stopped by request")]
pub struct Stopped;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    stopped: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
    wake: Condvar,
}

/// Cheaply clonable stop signal shared by everything working on one job or tick.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stopped: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
                wake: Condvar::new(),
            }),
        }
    }

    /// Request a stop. Returns true only for the call that actually flipped the flag.
    pub fn request_stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callbacks = {
            let mut guard = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            self.inner.wake.notify_all();
            std::mem::take(&mut *guard)
        };
        for cb in callbacks {
            cb();
        }
        true
    }

    /// Never blocks.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// `Err(Stopped)` once a stop has been requested.
    pub fn check(&self) -> Result<(), Stopped> {
        if self.is_stopped() {
            Err(Stopped)
        } else {
            Ok(())
        }
    }

    /// Run `cb` when the token fires (immediately if it already has).
    pub fn on_cancel<F>(&self, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self.is_stopped() {
            drop(guard);
            cb();
            return;
        }
        guard.push(Box::new(cb));
    }

    /// A token that fires when this one does, but can also be stopped on its own.
    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        child.follow(self);
        child
    }

    /// Also fire when `other` does. The link does not keep `self` alive.
    pub fn follow(&self, other: &CancellationToken) {
        let weak = Arc::downgrade(&self.inner);
        other.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                CancellationToken { inner }.request_stop();
            }
        });
    }

    /// Sleep for `duration` unless stopped first; wakes promptly on stop.
    pub fn sleep(&self, duration: Duration) -> Result<(), Stopped> {
        let deadline = Instant::now() + duration;
        let mut guard = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        loop {
            if self.is_stopped() {
                return Err(Stopped);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            guard = self
                .inner
                .wake
                .wait_timeout(guard, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}

/// Default path for the control socket (under the XDG state dir, next to the state DB).
pub fn default_control_socket_path() -> anyhow::Result<PathBuf> {
    Ok(crate::config::state_dir()?.join("control.sock"))
}
