use anyhow::Result;
use tracing::info;

use super::controller::JobController;
use super::state::{SchedulerState, StartResponse};
use crate::grid;
use crate::job::{now_ms, Job, JobConfig};

impl JobController {
    /// Validate `config`, generate the grid and persist a new job.
    ///
    /// An invalid config is returned as an error (a [`crate::job::ConfigError`])
    /// before anything is written. A live job already in the store is left alone
    /// and reported as `already-running`; a stale or drained one is replaced.
    pub async fn start(&self, config: JobConfig) -> Result<StartResponse> {
        let (config, url) = config.normalize()?;

        if let Some(existing) = self.store.load_job().await? {
            let age_ms = existing.age_ms(now_ms());
            let stale_ms = (self.cfg.stale_after_secs as i64).saturating_mul(1000);
            if existing.is_complete() || age_ms > stale_ms {
                info!(
                    job_id = existing.id,
                    age_ms,
                    cursor = existing.cursor,
                    total = existing.total(),
                    "discarding stale job"
                );
                self.store.clear().await?;
            } else {
                return Ok(StartResponse::already_running(existing.id));
            }
        }

        let points = grid::generate_points(
            &config.start,
            &config.end,
            config.step_x,
            config.step_y,
            config.block_size,
        )?;
        let id = self.store.fresh_job_id(now_ms()).await?;
        let job = Job::new(id, config, url, points);

        self.store.clear_stop_flag().await?;
        self.store.begin_job(&job).await?;
        self.reset_cancellation();
        self.set_state(SchedulerState::Scheduled);

        info!(
            job_id = job.id,
            total = job.total(),
            batch_size = job.config.batch_size,
            concurrency = job.concurrency,
            max_rps = job.max_rps,
            "job started"
        );
        Ok(StartResponse::started(job.id, job.total()))
    }
}
