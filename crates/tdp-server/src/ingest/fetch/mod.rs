//! Vendor fetch strategies
//!
//! One [`VendorFetcher`] implementation per [`SourceKind`]. Every strategy
//! normalizes its payload into `serde_json::Value` records so the mapping
//! engine never sees the wire format.
//!
//! Endpoint URLs, SOAP request templates and vendor SQL may carry the
//! placeholders `{since}`, `{until}`, `{username}`, `{password}` and
//! `{page}`. Datetime placeholders render as `YYYY-MM-DDTHH:MM:SS` in the
//! vendor's local timezone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::config::{SourceKind, VendorConfiguration};
use super::models::RawRecord;
use super::path::{self, Resolution};

pub mod api;
pub mod db;
pub mod multiapi;
pub mod soap;
pub mod xml;

pub use api::ApiFetcher;
pub use db::DbFetcher;
pub use multiapi::MultiApiFetcher;
pub use soap::SoapFetcher;
pub use xml::XmlFetcher;

/// Fetch failures, bucketed by what the orchestrator can log about them
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Half-open time window to fetch, in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// Parsed records plus a fingerprint of the payload they came from
#[derive(Debug)]
pub struct FetchedPayload {
    pub records: Vec<RawRecord>,
    pub fingerprint: Option<String>,
}

#[async_trait]
pub trait VendorFetcher: Send + Sync {
    async fn fetch(
        &self,
        config: &VendorConfiguration,
        window: FetchWindow,
    ) -> Result<FetchedPayload, FetchError>;
}

/// Select the fetcher for a source kind
pub fn fetcher_for(kind: SourceKind, http: reqwest::Client, max_pages: u32) -> Box<dyn VendorFetcher> {
    match kind {
        SourceKind::Api => Box::new(ApiFetcher::new(http)),
        SourceKind::Soap => Box::new(SoapFetcher::new(http)),
        SourceKind::MultiApi => Box::new(MultiApiFetcher::new(http, max_pages)),
        SourceKind::Xml => Box::new(XmlFetcher::new(http)),
        SourceKind::Db => Box::new(DbFetcher::new()),
    }
}

/// Shared HTTP client for all vendor calls
pub fn build_http_client(
    timeout: std::time::Duration,
    connect_timeout: std::time::Duration,
) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .user_agent(concat!("tdp-server/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Render request placeholders. Window bounds are expressed in the vendor's
/// local timezone since that is what vendor endpoints filter on.
pub(crate) fn render_placeholders(
    template: &str,
    config: &VendorConfiguration,
    window: FetchWindow,
    page: Option<u32>,
) -> String {
    let tz: chrono_tz::Tz = config.timezone.parse().unwrap_or(chrono_tz::UTC);
    let since = window.since.with_timezone(&tz).format("%Y-%m-%dT%H:%M:%S");
    let until = window.until.with_timezone(&tz).format("%Y-%m-%dT%H:%M:%S");

    let mut rendered = template
        .replace("{since}", &since.to_string())
        .replace("{until}", &until.to_string())
        .replace("{username}", config.username.as_deref().unwrap_or(""))
        .replace("{password}", config.password.as_deref().unwrap_or(""));

    if let Some(page) = page {
        rendered = rendered.replace("{page}", &page.to_string());
    }

    rendered
}

/// Map a non-success HTTP status onto the error taxonomy.
pub(crate) fn status_error(status: reqwest::StatusCode) -> FetchError {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::Auth(format!("endpoint returned {}", status))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            FetchError::Timeout(format!("endpoint returned {}", status))
        }
        other => FetchError::Transport(format!("endpoint returned {}", other)),
    }
}

const RECORD_LIST_KEYS: &[&str] = &["data", "records", "transactions", "results", "rows", "items"];

/// Pull the record list out of a parsed payload tree.
///
/// With a configured `records_path` the list is whatever the path resolves
/// to. Without one, a top-level array is the list, and a top-level object
/// is searched for the first well-known list key. A single object is
/// treated as a one-record payload.
pub(crate) fn extract_records(
    tree: Value,
    records_path: Option<&str>,
) -> Result<Vec<RawRecord>, FetchError> {
    if let Some(records_path) = records_path {
        let records = match path::resolve(&tree, records_path) {
            Resolution::Absent => Vec::new(),
            Resolution::One(Value::Array(items)) => items,
            Resolution::One(single) => vec![single],
            Resolution::Many(items) => items,
        };
        // A null list, or null elements in it, mean no records there.
        return Ok(records.into_iter().filter(|r| !r.is_null()).collect());
    }

    match tree {
        Value::Array(items) => Ok(items),
        Value::Object(map) => {
            for key in RECORD_LIST_KEYS {
                if let Some(Value::Array(items)) = map.get(*key) {
                    return Ok(items.clone());
                }
            }
            Ok(vec![Value::Object(map)])
        }
        other => Err(FetchError::Malformed(format!(
            "expected an object or array payload, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
