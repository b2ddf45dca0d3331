//! Parse response header lines.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Extract `Retry-After` from collected header lines, relative to `now`.
pub fn parse_headers(lines: &[String], now: DateTime<Utc>) -> Option<Duration> {
    let mut retry_after = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("retry-after") {
                retry_after = parse_retry_after(value.trim(), now);
            }
        }
    }
    retry_after
}

/// `Retry-After` is either delta-seconds or an HTTP-date. Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
