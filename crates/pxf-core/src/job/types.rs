//! Types persisted by the job state store.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::{SystemTime, UNIX_EPOCH};

use super::config::JobConfig;
use crate::aggregate::{AggregatedRecord, Aggregator};
use crate::grid::Coordinate;
use crate::url_model::UrlBuilder;

/// Job identifier: creation time in milliseconds since the epoch.
pub type JobId = i64;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Outcome counters. Only ever grow within a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub ok: u64,
    pub fail: u64,
    #[serde(rename = "_429")]
    pub rate_limited: u64,
    #[serde(rename = "_403")]
    pub forbidden: u64,
    pub err: u64,
    /// HTTP attempts made, including retries.
    #[serde(default)]
    pub attempts: u64,
}

impl Stats {
    pub fn add(&mut self, other: &Stats) {
        self.ok += other.ok;
        self.fail += other.fail;
        self.rate_limited += other.rate_limited;
        self.forbidden += other.forbidden;
        self.err += other.err;
        self.attempts += other.attempts;
    }

    /// Share of attempts answered with 429 or 403; 0 when nothing was attempted.
    pub fn throttled_ratio(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        (self.rate_limited + self.forbidden) as f64 / self.attempts as f64
    }
}

/// The durable unit of work spanning many ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub config: JobConfig,
    pub url: UrlBuilder,
    /// Fixed after generation.
    pub points: Vec<Coordinate>,
    /// Index of the next unprocessed point.
    pub cursor: usize,
    pub results: Aggregator,
    pub stats: Stats,
    /// Current worker count; only ever lowered by the adaptive throttle.
    pub concurrency: usize,
    /// Current request rate; only ever lowered by the adaptive throttle.
    pub max_rps: u32,
    pub created_at_ms: i64,
    #[serde(default)]
    pub last_tick_at_ms: Option<i64>,
}

impl Job {
    /// A fresh job over `points` from an already-normalized config.
    pub fn new(id: JobId, config: JobConfig, url: UrlBuilder, points: Vec<Coordinate>) -> Self {
        Self {
            id,
            concurrency: config.concurrency,
            max_rps: config.max_rps,
            config,
            url,
            points,
            cursor: 0,
            results: Aggregator::new(),
            stats: Stats::default(),
            created_at_ms: id,
            last_tick_at_ms: None,
        }
    }

    pub fn total(&self) -> usize {
        self.points.len()
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.points.len()
    }

    /// Index range of the next batch, empty when the job is drained.
    pub fn next_batch(&self) -> Range<usize> {
        let start = self.cursor.min(self.points.len());
        let end = start.saturating_add(self.config.batch_size).min(self.points.len());
        start..end
    }

    /// Move the cursor forward by `n`, never past the end.
    pub fn advance(&mut self, n: usize) {
        self.cursor = self.cursor.saturating_add(n).min(self.points.len());
    }

    /// Milliseconds since the last tick, or since creation if none ran yet.
    pub fn age_ms(&self, now: i64) -> i64 {
        now - self.last_tick_at_ms.unwrap_or(self.created_at_ms)
    }

    pub fn run_state(&self) -> RunState {
        RunState {
            running: true,
            job_id: self.id,
            total: self.total(),
            config: self.config.clone(),
            started_at: self.created_at_ms,
        }
    }
}

/// Cheap summary of the active job, readable without loading the point list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub running: bool,
    pub job_id: JobId,
    pub total: usize,
    pub config: JobConfig,
    pub started_at: i64,
}

/// What the most recent tick covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastBatch {
    pub start_index: usize,
    pub end_index: usize,
    pub count: usize,
    pub timestamp: i64,
    pub duration_ms: u64,
}

/// Progress record published after every tick and on finish/stop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub done: usize,
    pub total: usize,
    /// Capped sample, except in the final record of a completed job.
    pub records: Vec<AggregatedRecord>,
    pub stats: Stats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_batch: Option<LastBatch>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub stopped: bool,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ProgressSnapshot {
    /// Snapshot of `job` with at most `sample_limit` records.
    pub fn of(job: &Job, sample_limit: usize) -> Self {
        Self {
            done: job.cursor,
            total: job.total(),
            records: job.results.sample(sample_limit),
            stats: job.stats,
            last_batch: None,
            finished: false,
            stopped: false,
            timestamp: now_ms(),
            reason: None,
            filename: None,
        }
    }
}
