use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::config::{RetryConfig, DEFAULT_ID_FIELD, DEFAULT_URL_TEMPLATE};
use crate::grid::{self, Corner};
use crate::url_model::UrlBuilder;

/// Everything one job needs: grid bounds and stride, pacing limits, request template.
///
/// Stored verbatim inside the persisted job and the run-state summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Points processed per tick.
    pub batch_size: usize,
    /// Delay between ticks.
    pub batch_delay_ms: u64,
    pub max_rps: u32,
    pub concurrency: usize,
    pub start: Corner,
    pub end: Corner,
    pub block_size: i64,
    pub step_x: i64,
    pub step_y: i64,
    pub url_template: String,
    /// Dotted path of the identifier in the response JSON.
    pub id_field: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 2_700,
            max_rps: 6,
            concurrency: 4,
            start: Corner::default(),
            end: Corner::default(),
            block_size: 1000,
            step_x: 1,
            step_y: 1,
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl JobConfig {
    /// Clamp limits to at least 1, validate the grid and select the URL mode.
    ///
    /// Returns the normalized config and the URL builder chosen for it.
    pub fn normalize(&self) -> Result<(JobConfig, UrlBuilder), ConfigError> {
        let mut cfg = self.clone();
        cfg.batch_size = cfg.batch_size.max(1);
        cfg.max_rps = cfg.max_rps.max(1);
        cfg.concurrency = cfg.concurrency.max(1);
        cfg.retry.max_attempts = cfg.retry.max_attempts.max(1);
        cfg.id_field = cfg.id_field.trim().to_string();
        if cfg.id_field.is_empty() || cfg.id_field.split('.').any(str::is_empty) {
            return Err(ConfigError::IdField);
        }

        // Validates block size and stride, and that the grid fits in memory.
        grid::point_count(&cfg.start, &cfg.end, cfg.step_x, cfg.step_y, cfg.block_size)?;

        let url = UrlBuilder::from_template(&cfg.url_template)?;
        Ok((cfg, url))
    }
}
