use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::controller::JobController;
use super::guard::PollerGuard;
use super::state::{SchedulerState, TickOutcome};
use super::stop::DEFAULT_STOP_REASON;
use crate::control::CancellationToken;
use crate::export;
use crate::fetcher::{self, FetchContext};
use crate::job::{now_ms, Job, LastBatch, ProgressSnapshot};
use crate::job_store::JobStore;
use crate::rate_limit::TokenBucket;
use crate::throttle;

impl JobController {
    /// Run one tick: drain the next slice of the persisted job and checkpoint.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Some(mut job) = self.store.load_job().await? else {
            debug!("tick with no persisted job");
            self.set_state(SchedulerState::Idle);
            return Ok(TickOutcome::Idle);
        };

        if let Some(reason) = self.observed_stop().await? {
            self.settle_stop(&job, &reason).await?;
            return Ok(TickOutcome::Cancelled);
        }

        if job.is_complete() {
            return self.finalize(&job).await;
        }

        self.set_state(SchedulerState::Running);
        let range = job.next_batch();
        let batch_token = self.cancellation().child();
        batch_token.follow(&self.interruption());
        let _poller = PollerGuard(tokio::spawn(poll_stop_flag(
            self.store.clone(),
            batch_token.clone(),
            self.poll_interval(),
        )));

        let ctx = FetchContext {
            transport: Arc::clone(&self.transport),
            url: job.url.clone(),
            policy: job.config.retry.into(),
            id_field: job.config.id_field.clone(),
            limiter: Arc::new(TokenBucket::per_second(job.max_rps)),
        };
        let points = job.points[range.clone()].to_vec();
        let concurrency = job.concurrency;
        let started = Instant::now();
        let token = batch_token.clone();
        let report = tokio::task::spawn_blocking(move || {
            fetcher::run_batch(&points, concurrency, &ctx, &token)
        })
        .await
        .context("worker pool join")?;
        let duration = started.elapsed();

        job.results.merge(report.results);
        job.stats.add(&report.stats);
        job.advance(report.processed);
        job.last_tick_at_ms = Some(now_ms());
        let decision = throttle::apply(&mut job, &report.observed, &self.cfg);

        if !self.store.checkpoint_job(&job).await? {
            info!(job_id = job.id, "checkpoint dropped; job was stopped elsewhere");
            self.set_state(SchedulerState::Cancelled);
            return Ok(TickOutcome::Cancelled);
        }

        let mut progress = ProgressSnapshot::of(&job, self.cfg.sample_limit);
        progress.last_batch = Some(LastBatch {
            start_index: range.start,
            end_index: range.start + report.processed,
            count: report.processed,
            timestamp: now_ms(),
            duration_ms: duration.as_millis() as u64,
        });
        self.store.save_progress(&progress).await?;

        debug!(
            job_id = job.id,
            start = range.start,
            processed = report.processed,
            cursor = job.cursor,
            total = job.total(),
            ok = job.stats.ok,
            fail = job.stats.fail,
            ratio = decision.ratio,
            elapsed_ms = duration.as_millis() as u64,
            "tick done"
        );

        if report.stopped {
            let reason = match self.observed_stop().await? {
                Some(reason) => reason,
                None if self.interruption().is_stopped() => {
                    info!(job_id = job.id, cursor = job.cursor, "batch interrupted, job kept");
                    self.set_state(SchedulerState::Idle);
                    return Ok(TickOutcome::Interrupted);
                }
                None => DEFAULT_STOP_REASON.to_string(),
            };
            self.settle_stop(&job, &reason).await?;
            return Ok(TickOutcome::Cancelled);
        }

        if job.is_complete() {
            return self.finalize(&job).await;
        }

        let mut delay = Duration::from_millis(job.config.batch_delay_ms);
        if let Some(cooldown) = decision.cooldown {
            warn!(
                job_id = job.id,
                ratio = decision.ratio,
                cooldown_ms = cooldown.as_millis() as u64,
                "high throttled ratio, cooling down"
            );
            delay += cooldown;
        }
        self.set_state(SchedulerState::Scheduled);
        Ok(TickOutcome::Continue { delay })
    }

    /// Stop reason if a stop was requested in this process or via the persisted flag.
    pub(super) async fn observed_stop(&self) -> Result<Option<String>> {
        if let Some(req) = self.store.stop_flag().await? {
            return Ok(Some(req.reason));
        }
        if self.cancellation().is_stopped() {
            return Ok(Some(DEFAULT_STOP_REASON.to_string()));
        }
        Ok(None)
    }

    /// Publish the final record, export everything and clear the job.
    async fn finalize(&self, job: &Job) -> Result<TickOutcome> {
        self.set_state(SchedulerState::Finalizing);
        let name = export::final_filename(now_ms());
        let text = export::render_ndjson(job.results.records(), None)?;
        let path = self
            .sink
            .write_text(&name, &text)
            .context("export final results")?;

        let mut progress = ProgressSnapshot::of(job, usize::MAX);
        progress.finished = true;
        progress.filename = Some(name);
        self.store.save_progress(&progress).await?;
        self.store.clear().await?;
        self.set_state(SchedulerState::Idle);

        info!(
            job_id = job.id,
            total = job.total(),
            records = job.results.len(),
            ok = job.stats.ok,
            fail = job.stats.fail,
            path = %path.display(),
            "job finished"
        );
        Ok(TickOutcome::Finished { export: path })
    }
}

/// Fire `token` once the persisted stop flag appears.
async fn poll_stop_flag(store: JobStore, token: CancellationToken, every: Duration) {
    loop {
        tokio::time::sleep(every).await;
        if token.is_stopped() {
            return;
        }
        match store.stop_flag().await {
            Ok(Some(req)) => {
                debug!(reason = %req.reason, "stop flag observed during tick");
                token.request_stop();
                return;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "stop flag poll failed"),
        }
    }
}
