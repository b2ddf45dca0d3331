use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::job::JobConfig;

/// Default request template: the public pixel endpoint, one GET per grid point.
pub const DEFAULT_URL_TEMPLATE: &str =
    "https://backend.wplace.live/s0/pixel/{blockX}/{blockY}?x={lx}&y={ly}";

/// Default dotted path of the identifier inside each JSON response.
pub const DEFAULT_ID_FIELD: &str = "paintedBy.id";

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per grid point (including the first).
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Tick pacing, staleness and adaptive throttle knobs (optional section in config.toml).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay before the first tick of a new job.
    pub initial_delay_ms: u64,
    /// Delay before the recovery tick that follows a scheduling fault.
    pub recovery_delay_ms: u64,
    /// A persisted job older than this is considered abandoned on `start`.
    pub stale_after_secs: u64,
    /// Cap on records carried by progress snapshots and interim exports.
    pub sample_limit: usize,
    /// 429/403 ratio above which concurrency and RPS are cut for the rest of the job.
    pub throttle_ratio: f64,
    /// 429/403 ratio above which an extra cooldown precedes the next tick.
    pub cooldown_ratio: f64,
    /// Multiplier applied to concurrency and RPS when throttling down.
    pub throttle_factor: f64,
    /// How often the persisted stop flag is polled while a tick runs or waits.
    pub stop_poll_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_700,
            recovery_delay_ms: 12_000,
            stale_after_secs: 600,
            sample_limit: 200,
            throttle_ratio: 0.05,
            cooldown_ratio: 0.12,
            throttle_factor: 0.65,
            stop_poll_ms: 250,
        }
    }
}

/// Global configuration loaded from `~/.config/pxf/config.toml`.
///
/// The top-level values are defaults for new jobs; anything given on the
/// command line overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PxfConfig {
    /// Grid points processed per tick.
    pub batch_size: usize,
    /// Delay between ticks in milliseconds.
    pub batch_delay_ms: u64,
    /// Maximum requests per second across all workers.
    pub max_rps: u32,
    /// Number of concurrent fetch workers.
    pub concurrency: usize,
    /// Pixels per block along each axis.
    pub block_size: i64,
    /// Request URL template (placeholders, path base or query base).
    pub url_template: String,
    /// Dotted path of the identifier inside the response body.
    pub id_field: String,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
    /// Where exported result files go (None = XDG data dir).
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
}

impl Default for PxfConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 2_700,
            max_rps: 6,
            concurrency: 4,
            block_size: 1000,
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            retry: None,
            scheduler: None,
            export_dir: None,
        }
    }
}

impl PxfConfig {
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.unwrap_or_default()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        self.scheduler.unwrap_or_default()
    }

    /// A job config pre-filled with this config's defaults; the caller sets the grid.
    pub fn job_template(&self) -> JobConfig {
        JobConfig {
            batch_size: self.batch_size,
            batch_delay_ms: self.batch_delay_ms,
            max_rps: self.max_rps,
            concurrency: self.concurrency,
            block_size: self.block_size,
            url_template: self.url_template.clone(),
            id_field: self.id_field.clone(),
            retry: self.retry_config(),
            ..JobConfig::default()
        }
    }

    /// Export directory from config, or `~/.local/share/pxf/exports`.
    pub fn resolved_export_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.export_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("pxf")?;
        Ok(xdg_dirs.get_data_home().join("pxf").join("exports"))
    }
}

/// State directory: `~/.local/state/pxf`.
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pxf")?;
    Ok(xdg_dirs.get_state_home().join("pxf"))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pxf")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<PxfConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = PxfConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: PxfConfig = toml::from_str(&data)?;
    Ok(cfg)
}
