//! RAII guard that stops the stop-flag poller when a tick ends.

use tokio::task::JoinHandle;

pub(super) struct PollerGuard(pub(super) JoinHandle<()>);

impl Drop for PollerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
