//! Export of aggregated results as newline-delimited JSON files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::aggregate::AggregatedRecord;

/// Receives a named text blob (one export file).
pub trait ExportSink: Send + Sync {
    /// Write `text` under `name` and return where it went.
    fn write_text(&self, name: &str, text: &str) -> Result<PathBuf>;
}

/// Writes exports into a directory, creating it on first use.
#[derive(Debug, Clone)]
pub struct DirSink {
    dir: PathBuf,
}

impl DirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ExportSink for DirSink {
    fn write_text(&self, name: &str, text: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create export dir {}", self.dir.display()))?;
        let path = self.dir.join(name);
        // Write then rename so a reader never sees a half-written file.
        let tmp = self.dir.join(format!(".{}.part", name));
        std::fs::write(&tmp, text).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
        Ok(path)
    }
}

/// One JSON object per line, at most `limit` records when given.
pub fn render_ndjson(records: &[AggregatedRecord], limit: Option<usize>) -> Result<String> {
    let take = limit.unwrap_or(records.len());
    let mut out = String::new();
    for r in records.iter().take(take) {
        out.push_str(&serde_json::to_string(r)?);
        out.push('\n');
    }
    Ok(out)
}

/// Name of the full export written when a job completes.
pub fn final_filename(ts_ms: i64) -> String {
    format!("auto_fetch_{}.ndjson", ts_ms)
}

/// Name of the capped snapshot written when a job is stopped.
pub fn snapshot_filename(reason: &str, ts_ms: i64) -> String {
    let reason: String = reason
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let reason = if reason.is_empty() { "stop".to_string() } else { reason };
    format!("auto_fetch_snapshot_{}_{}.ndjson", reason, ts_ms)
}
