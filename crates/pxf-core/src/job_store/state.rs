//! Key/value operations on the state table.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::db::JobStore;
use crate::job::{now_ms, Job, JobId, ProgressSnapshot, RunState};

const KEY_RUN_STATE: &str = "run_state";
const KEY_JOB: &str = "job";
const KEY_STOP_FLAG: &str = "stop_flag";
const KEY_PROGRESS: &str = "progress";

/// Persisted stop request; visible to a runner in another process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub requested_at: i64,
    pub reason: String,
}

impl JobStore {
    async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        sqlx::query(
            r#"
            INSERT INTO state (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(json)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .with_context(|| format!("write state key {}", key))?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT value FROM state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let json: String = row.get("value");
        let value = serde_json::from_str(&json)
            .with_context(|| format!("decode state key {}", key))?;
        Ok(Some(value))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM state WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a new job and its run-state summary together.
    pub async fn begin_job(&self, job: &Job) -> Result<()> {
        let now = now_ms();
        let job_json = serde_json::to_string(job)?;
        let run_json = serde_json::to_string(&job.run_state())?;
        let mut tx = self.pool.begin().await?;
        for (key, value) in [(KEY_JOB, job_json), (KEY_RUN_STATE, run_json)] {
            sqlx::query(
                r#"
                INSERT INTO state (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM state WHERE key = ?1")
            .bind(KEY_PROGRESS)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Write a tick checkpoint unless the job was stopped or replaced meanwhile.
    ///
    /// Returns false when the write was dropped.
    pub async fn checkpoint_job(&self, job: &Job) -> Result<bool> {
        let json = serde_json::to_string(job)?;
        let res = sqlx::query(
            r#"
            INSERT INTO state (key, value, updated_at)
            SELECT ?1, ?2, ?3
            WHERE NOT EXISTS (SELECT 1 FROM stop_claims WHERE job_id = ?4)
              AND NOT EXISTS (
                  SELECT 1 FROM state
                  WHERE key = ?1 AND json_extract(value, '$.id') != ?4
              )
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(KEY_JOB)
        .bind(json)
        .bind(now_ms())
        .bind(job.id)
        .execute(&self.pool)
        .await
        .context("checkpoint job")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn load_job(&self) -> Result<Option<Job>> {
        self.get(KEY_JOB).await
    }

    /// Remove the job and its run-state summary. Progress and the stop flag stay.
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM state WHERE key IN (?1, ?2)")
            .bind(KEY_JOB)
            .bind(KEY_RUN_STATE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_run_state(&self) -> Result<Option<RunState>> {
        self.get(KEY_RUN_STATE).await
    }

    pub async fn set_stop_flag(&self, req: &StopRequest) -> Result<()> {
        self.put(KEY_STOP_FLAG, req).await
    }

    pub async fn stop_flag(&self) -> Result<Option<StopRequest>> {
        self.get(KEY_STOP_FLAG).await
    }

    pub async fn clear_stop_flag(&self) -> Result<()> {
        self.delete(KEY_STOP_FLAG).await
    }

    pub async fn save_progress(&self, progress: &ProgressSnapshot) -> Result<()> {
        self.put(KEY_PROGRESS, progress).await
    }

    pub async fn load_progress(&self) -> Result<Option<ProgressSnapshot>> {
        self.get(KEY_PROGRESS).await
    }

    /// Claim `job_id`'s stop and commit its terminal state in one transaction:
    /// the claim, the `stopped` progress record and removal of the job.
    ///
    /// Returns false, writing nothing, when the stop was already claimed. If any
    /// write fails the claim is rolled back so a later stop can retry.
    pub async fn record_stop(&self, job_id: JobId, progress: &ProgressSnapshot) -> Result<bool> {
        let now = now_ms();
        let progress_json = serde_json::to_string(progress)?;
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query("INSERT OR IGNORE INTO stop_claims (job_id, claimed_at) VALUES (?1, ?2)")
            .bind(job_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(
            r#"
            INSERT INTO state (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(KEY_PROGRESS)
        .bind(progress_json)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("write stop progress")?;
        sqlx::query("DELETE FROM state WHERE key IN (?1, ?2)")
            .bind(KEY_JOB)
            .bind(KEY_RUN_STATE)
            .execute(&mut *tx)
            .await?;
        tx.commit().await.context("commit stop")?;
        Ok(true)
    }

    /// An id at or after `now` that no earlier job has used for a stop claim.
    pub async fn fresh_job_id(&self, now: JobId) -> Result<JobId> {
        let row = sqlx::query("SELECT MAX(job_id) AS last FROM stop_claims")
            .fetch_one(&self.pool)
            .await?;
        let last: Option<i64> = row.get("last");
        Ok(match last {
            Some(last) if last >= now => last + 1,
            _ => now,
        })
    }
}
