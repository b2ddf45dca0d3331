//! libcurl-backed transport.

use chrono::Utc;
use std::str;
use std::time::Duration;

use super::{parse, HttpResponse, Transport};
use crate::control::CancellationToken;
use crate::retry::TransportError;

/// Bodies larger than this abort the transfer.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Blocking GETs via curl easy handles. Call from worker threads, not async tasks.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            user_agent: concat!("pxf/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Transport for CurlTransport {
    fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse, TransportError> {
        if cancel.is_stopped() {
            return Err(TransportError::Cancelled);
        }
        let mut headers: Vec<String> = Vec::new();
        let mut body: Vec<u8> = Vec::new();

        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        easy.get(true)?;
        easy.follow_location(true)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.timeout(self.timeout)?;
        easy.useragent(&self.user_agent)?;
        easy.progress(true)?;

        let mut list = curl::easy::List::new();
        list.append("Accept: application/json")?;
        list.append("Cache-Control: no-store")?;
        easy.http_headers(list)?;

        let performed = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    // A new status line starts a new response (redirects).
                    if s.starts_with("HTTP/") {
                        headers.clear();
                    }
                    headers.push(s.trim_end().to_string());
                }
                true
            })?;
            transfer.write_function(|data| {
                if body.len() + data.len() > MAX_BODY_BYTES {
                    return Ok(0);
                }
                body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.progress_function(|_, _, _, _| !cancel.is_stopped())?;
            transfer.perform()
        };
        if let Err(e) = performed {
            if e.is_aborted_by_callback() || cancel.is_stopped() {
                return Err(TransportError::Cancelled);
            }
            return Err(e.into());
        }

        let status = easy.response_code()?;
        Ok(HttpResponse {
            status,
            retry_after: parse::parse_headers(&headers, Utc::now()),
            body,
        })
    }
}
