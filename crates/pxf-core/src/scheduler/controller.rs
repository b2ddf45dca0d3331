use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::state::SchedulerState;
use crate::config::SchedulerConfig;
use crate::control::CancellationToken;
use crate::export::ExportSink;
use crate::job::{ProgressSnapshot, RunState};
use crate::job_store::JobStore;
use crate::transport::Transport;

/// Job control API: start, tick, stop, progress.
///
/// Cheap to clone; clones share the store, the in-process cancellation and
/// interrupt tokens, and the state machine.
#[derive(Clone)]
pub struct JobController {
    pub(super) store: JobStore,
    pub(super) sink: Arc<dyn ExportSink>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) cfg: SchedulerConfig,
    cancel: Arc<Mutex<CancellationToken>>,
    interrupt: Arc<Mutex<CancellationToken>>,
    state: Arc<Mutex<SchedulerState>>,
}

impl JobController {
    pub fn new(
        store: JobStore,
        sink: Arc<dyn ExportSink>,
        transport: Arc<dyn Transport>,
        cfg: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            sink,
            transport,
            cfg,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            interrupt: Arc::new(Mutex::new(CancellationToken::new())),
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn scheduler_config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    /// The in-process cancellation token for the current job.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Fresh token for a new job; a fired token is never un-fired.
    pub(super) fn reset_cancellation(&self) {
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = CancellationToken::new();
    }

    /// Abandon the current [`run`](Self::run) without stopping the job.
    ///
    /// The in-flight batch is cancelled and checkpointed, the stop flag is not
    /// written and the job stays persisted for the next run.
    pub fn interrupt(&self) {
        self.interruption().request_stop();
    }

    pub(super) fn interruption(&self) -> CancellationToken {
        self.interrupt.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(super) fn reset_interruption(&self) {
        *self.interrupt.lock().unwrap_or_else(|e| e.into_inner()) = CancellationToken::new();
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn set_state(&self, next: SchedulerState) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *s != next {
            tracing::debug!(from = ?*s, to = ?next, "scheduler state");
            *s = next;
        }
    }

    /// Latest progress snapshot, if any job has published one.
    pub async fn get_progress(&self) -> Result<Option<ProgressSnapshot>> {
        self.store.load_progress().await
    }

    /// Run-state summary of the active job.
    pub async fn run_state(&self) -> Result<Option<RunState>> {
        self.store.load_run_state().await
    }

    pub(super) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.cfg.stop_poll_ms.max(10))
    }
}
