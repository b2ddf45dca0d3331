use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::controller::JobController;
use super::state::{SchedulerState, TickOutcome};

impl JobController {
    /// Tick the persisted job until it finishes, is cancelled, disappears or
    /// [`interrupt`](Self::interrupt) is called.
    ///
    /// The first tick fires after `initial_delay_ms`. A failing tick is logged
    /// and retried after `recovery_delay_ms`; the job is never abandoned for it.
    pub async fn run(&self) -> Result<TickOutcome> {
        self.reset_interruption();
        let mut delay = Duration::from_millis(self.cfg.initial_delay_ms);
        loop {
            self.wait(delay).await;
            if self.interruption().is_stopped() {
                info!("run interrupted between ticks");
                self.set_state(SchedulerState::Idle);
                return Ok(TickOutcome::Interrupted);
            }
            match self.tick().await {
                Ok(TickOutcome::Continue { delay: next }) => delay = next,
                Ok(outcome) => {
                    info!(?outcome, "scheduler done");
                    return Ok(outcome);
                }
                Err(e) => {
                    delay = Duration::from_millis(self.cfg.recovery_delay_ms);
                    warn!(
                        error = %format!("{:#}", e),
                        retry_in_ms = delay.as_millis() as u64,
                        "tick failed, scheduling recovery tick"
                    );
                }
            }
        }
    }

    /// Sleep up to `delay`, returning early on a stop request or an interrupt.
    async fn wait(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let poll = self.poll_interval();
        loop {
            if self.cancellation().is_stopped() || self.interruption().is_stopped() {
                return;
            }
            if let Ok(Some(_)) = self.store.stop_flag().await {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            tokio::time::sleep((deadline - now).min(poll)).await;
        }
    }
}
