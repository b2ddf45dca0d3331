//! Request URL building.
//!
//! The template is inspected once, when a job config is normalized, and turned
//! into one of three explicit modes. Per-request building never re-detects.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::grid::Coordinate;
use crate::job::ConfigError;

const PLACEHOLDERS: [&str; 5] = ["{blockX}", "{blockY}", "{blockB}", "{lx}", "{ly}"];

/// How a request URL is derived from the configured template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "template", rename_all = "snake_case")]
pub enum UrlBuilder {
    /// `{blockX}`, `{blockY}` (alias `{blockB}`), `{lx}`, `{ly}` are substituted.
    Placeholder(String),
    /// `<base>/<blockX>/<blockY>?x=<lx>&y=<ly>`.
    PathAppend(String),
    /// Base already has a query: `&blockX=..&blockY=..&x=..&y=..` is appended.
    QueryAppend(String),
}

impl UrlBuilder {
    /// Pick the mode for `template` and check that it yields valid URLs.
    pub fn from_template(template: &str) -> Result<Self, ConfigError> {
        let tpl = template.trim();
        if tpl.is_empty() {
            return Err(ConfigError::Template {
                template: template.to_string(),
                reason: "empty template".to_string(),
            });
        }
        let builder = if PLACEHOLDERS.iter().any(|p| tpl.contains(p)) {
            UrlBuilder::Placeholder(tpl.to_string())
        } else if tpl.contains('?') {
            UrlBuilder::QueryAppend(tpl.to_string())
        } else {
            UrlBuilder::PathAppend(tpl.to_string())
        };

        let probe = Coordinate::from_global(0, 0, 1);
        builder.build(&probe).map_err(|reason| ConfigError::Template {
            template: template.to_string(),
            reason,
        })?;
        Ok(builder)
    }

    /// Build the request URL for one grid point.
    pub fn build(&self, c: &Coordinate) -> Result<String, String> {
        let raw = match self {
            UrlBuilder::Placeholder(tpl) => tpl
                .replace("{blockX}", &c.block_x.to_string())
                .replace("{blockY}", &c.block_y.to_string())
                .replace("{blockB}", &c.block_y.to_string())
                .replace("{lx}", &c.local_x.to_string())
                .replace("{ly}", &c.local_y.to_string()),
            UrlBuilder::PathAppend(base) => {
                let sep = if base.ends_with('/') { "" } else { "/" };
                format!(
                    "{}{}{}/{}?x={}&y={}",
                    base, sep, c.block_x, c.block_y, c.local_x, c.local_y
                )
            }
            UrlBuilder::QueryAppend(base) => {
                let mut url = Url::parse(base).map_err(|e| e.to_string())?;
                url.query_pairs_mut()
                    .append_pair("blockX", &c.block_x.to_string())
                    .append_pair("blockY", &c.block_y.to_string())
                    .append_pair("x", &c.local_x.to_string())
                    .append_pair("y", &c.local_y.to_string());
                url.into()
            }
        };
        let url = Url::parse(&raw).map_err(|e| format!("{}: {}", raw, e))?;
        match url.scheme() {
            "http" | "https" => Ok(raw),
            other => Err(format!("unsupported scheme {:?}", other)),
        }
    }
}
