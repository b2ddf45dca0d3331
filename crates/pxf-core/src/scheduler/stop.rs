use anyhow::Result;
use tracing::{info, warn};

use super::controller::JobController;
use super::state::{SchedulerState, StopResponse};
use crate::export;
use crate::job::{now_ms, Job, ProgressSnapshot};
use crate::job_store::StopRequest;

/// Reason recorded when none was given.
pub(super) const DEFAULT_STOP_REASON: &str = "stop";

impl JobController {
    /// Request a stop of the current job.
    ///
    /// Fires the in-process token, persists the stop flag for runners in other
    /// processes, then tries to perform the terminal side effects. Repeated or
    /// concurrent calls are safe: exactly one caller exports the snapshot.
    pub async fn stop(&self, reason: &str) -> Result<StopResponse> {
        let reason = self.signal_stop(reason).await?;
        let reason = reason.as_str();

        let Some(job) = self.store.load_job().await? else {
            return Ok(StopResponse {
                ok: true,
                job_id: None,
                filename: None,
            });
        };
        let filename = self.settle_stop(&job, reason).await?;
        Ok(StopResponse {
            ok: true,
            job_id: Some(job.id),
            filename,
        })
    }

    /// Fire the in-process token and persist the stop flag, leaving the side
    /// effects to the runner. Returns the normalized reason.
    pub async fn signal_stop(&self, reason: &str) -> Result<String> {
        let reason = match reason.trim() {
            "" => DEFAULT_STOP_REASON,
            r => r,
        };
        self.cancellation().request_stop();
        self.store
            .set_stop_flag(&StopRequest {
                requested_at: now_ms(),
                reason: reason.to_string(),
            })
            .await?;
        Ok(reason.to_string())
    }

    /// Perform the stop side effects for `job` if nobody has yet.
    ///
    /// Commits the claim, a `stopped` progress record and removal of the job
    /// atomically, then exports a capped snapshot. A failed commit leaves the job
    /// in place for the next stop. Returns the export file name for the winner.
    pub(super) async fn settle_stop(&self, job: &Job, reason: &str) -> Result<Option<String>> {
        self.set_state(SchedulerState::Cancelled);

        let limit = self.cfg.sample_limit;
        let snapshot = if job.results.is_empty() {
            None
        } else {
            let name = export::snapshot_filename(reason, now_ms());
            let text = export::render_ndjson(job.results.records(), Some(limit))?;
            Some((name, text))
        };

        let mut progress = ProgressSnapshot::of(job, limit);
        progress.stopped = true;
        progress.reason = Some(reason.to_string());
        progress.filename = snapshot.as_ref().map(|(name, _)| name.clone());
        if !self.store.record_stop(job.id, &progress).await? {
            info!(job_id = job.id, "stop already handled");
            return Ok(None);
        }

        let mut filename = None;
        if let Some((name, text)) = snapshot {
            match self.sink.write_text(&name, &text) {
                Ok(path) => {
                    info!(job_id = job.id, path = %path.display(), "exported stop snapshot");
                    filename = Some(name);
                }
                Err(e) => {
                    warn!(job_id = job.id, error = %e, "stop snapshot export failed");
                    progress.filename = None;
                    self.store.save_progress(&progress).await?;
                }
            }
        }

        info!(
            job_id = job.id,
            done = job.cursor,
            total = job.total(),
            reason,
            "job stopped"
        );
        Ok(filename)
    }
}
