//! Structured logging via `tracing`.
//!
//! The CLI logs to `~/.local/state/pxf/pxf.log`; when that file cannot be
//! opened it falls back to stderr. `PXF_LOG` (then `RUST_LOG`) overrides the
//! default filter.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,pxf=debug,pxf_core=debug";

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "PXF_LOG";

/// Path of the log file: `~/.local/state/pxf/pxf.log`.
pub fn log_file_path() -> Result<PathBuf> {
    Ok(crate::config::state_dir()?.join("pxf.log"))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Append structured logs to the log file.
/// Errors (unwritable state dir, subscriber already set) are returned so the caller can fall back.
pub fn init_logging() -> Result<()> {
    let path = log_file_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;

    // `&File` is `Write`, so one shared handle serves every event.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install subscriber: {}", e))?;

    tracing::info!(path = %path.display(), pid = std::process::id(), "pxf logging initialized");
    Ok(())
}

/// Log to stderr only. Never fails; a second call is a no-op.
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
