//! Ingestion configuration
//!
//! Two layers of configuration drive the pipeline: process-level settings
//! from the environment ([`IngestSettings`]) and per-vendor rows from the
//! `vendor_configurations` and `field_mappings` tables, loaded through
//! [`ConfigRepository`] at the start of every cycle so edits take effect
//! without a restart.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_LOOKBACK_HOURS: u64 = 24;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_PAGES: u32 = 500;
pub const DEFAULT_PAGE_SIZE: i32 = 200;
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Process-level ingestion settings
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Master switch for the periodic scheduler
    pub enabled: bool,
    /// Seconds between ingestion cycles
    pub cycle_interval_secs: u64,
    /// How far back the first fetch window reaches for a vendor with no
    /// successful history
    pub lookback_hours: u64,
    /// Run a cycle immediately at startup instead of waiting one interval
    pub run_on_startup: bool,
    /// Per-request timeout for vendor HTTP calls
    pub http_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
    /// Upper bound on pages fetched from a paginated source in one window
    pub max_pages: u32,
    /// Start the apalis worker for queued single-vendor sync jobs
    pub queue_enabled: bool,
    /// Worker concurrency for the job queue
    pub worker_threads: usize,
}

impl IngestSettings {
    /// Read settings from the environment
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            enabled: std::env::var("INGEST_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            cycle_interval_secs: std::env::var("INGEST_CYCLE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CYCLE_INTERVAL_SECS),
            lookback_hours: std::env::var("INGEST_LOOKBACK_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_LOOKBACK_HOURS),
            run_on_startup: std::env::var("INGEST_RUN_ON_STARTUP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            http_timeout_secs: std::env::var("INGEST_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            http_connect_timeout_secs: std::env::var("INGEST_HTTP_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_HTTP_CONNECT_TIMEOUT_SECS),
            max_pages: std::env::var("INGEST_MAX_PAGES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_PAGES),
            queue_enabled: std::env::var("INGEST_QUEUE_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
            worker_threads: std::env::var("INGEST_WORKER_THREADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WORKER_THREADS),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cycle_interval_secs == 0 {
            anyhow::bail!("INGEST_CYCLE_INTERVAL_SECS must be greater than zero");
        }
        if self.lookback_hours == 0 {
            anyhow::bail!("INGEST_LOOKBACK_HOURS must be greater than zero");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("INGEST_HTTP_TIMEOUT_SECS must be greater than zero");
        }
        if self.max_pages == 0 {
            anyhow::bail!("INGEST_MAX_PAGES must be greater than zero");
        }
        if self.worker_threads == 0 {
            anyhow::bail!("INGEST_WORKER_THREADS must be greater than zero");
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http_connect_timeout_secs)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.lookback_hours as i64)
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cycle_interval_secs: DEFAULT_CYCLE_INTERVAL_SECS,
            lookback_hours: DEFAULT_LOOKBACK_HOURS,
            run_on_startup: true,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            http_connect_timeout_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            max_pages: DEFAULT_MAX_PAGES,
            queue_enabled: false,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

/// Fetch strategy selected by a vendor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Single REST endpoint returning JSON
    Api,
    /// SOAP endpoint, request body from a template, XML response
    Soap,
    /// Paginated REST endpoint
    MultiApi,
    /// Plain XML over HTTP GET
    Xml,
    /// Direct read-only query against a vendor database
    Db,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Api => "api",
            SourceKind::Soap => "soap",
            SourceKind::MultiApi => "multiapi",
            SourceKind::Xml => "xml",
            SourceKind::Db => "db",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['_', '-'], "").as_str() {
            "api" | "rest" => Ok(SourceKind::Api),
            "soap" => Ok(SourceKind::Soap),
            "multiapi" | "pagedapi" => Ok(SourceKind::MultiApi),
            "xml" => Ok(SourceKind::Xml),
            "db" | "database" | "sql" => Ok(SourceKind::Db),
            other => anyhow::bail!("Invalid source kind: {}", other),
        }
    }
}

/// One vendor endpoint, scoped to a brand and outlet
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VendorConfiguration {
    pub id: Uuid,
    pub vendor_name: String,
    pub brand_id: String,
    pub outlet_id: String,
    /// Till or register identifier, copied onto every transaction that
    /// does not carry its own
    pub terminal: Option<String>,
    /// Entry gate or floor identifier, same fallback rule as terminal
    pub gate: Option<String>,
    pub source_kind: String,
    pub endpoint_url: Option<String>,
    pub auth_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub soap_action: Option<String>,
    pub request_template: Option<String>,
    pub records_path: Option<String>,
    pub db_connection_string: Option<String>,
    pub db_query: Option<String>,
    pub page_size: Option<i32>,
    pub timezone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VendorConfiguration {
    pub fn source_kind(&self) -> Result<SourceKind> {
        self.source_kind
            .parse()
            .with_context(|| format!("Vendor configuration {}", self.id))
    }

    pub fn page_size(&self) -> i32 {
        self.page_size.filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Short identity label for log lines
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.vendor_name, self.brand_id, self.outlet_id)
    }

    /// Check that the fields the selected fetch strategy needs are present
    /// and that the timezone is a known IANA name.
    pub fn validate(&self) -> Result<()> {
        let kind = self.source_kind()?;

        match kind {
            SourceKind::Api | SourceKind::MultiApi | SourceKind::Xml => {
                if self.endpoint_url.as_deref().unwrap_or("").is_empty() {
                    anyhow::bail!("{}: endpoint_url is required for {} sources", self.label(), kind);
                }
            }
            SourceKind::Soap => {
                if self.endpoint_url.as_deref().unwrap_or("").is_empty() {
                    anyhow::bail!("{}: endpoint_url is required for soap sources", self.label());
                }
                if self.request_template.as_deref().unwrap_or("").is_empty() {
                    anyhow::bail!("{}: request_template is required for soap sources", self.label());
                }
            }
            SourceKind::Db => {
                if self.db_connection_string.as_deref().unwrap_or("").is_empty() {
                    anyhow::bail!("{}: db_connection_string is required for db sources", self.label());
                }
                if self.db_query.as_deref().unwrap_or("").is_empty() {
                    anyhow::bail!("{}: db_query is required for db sources", self.label());
                }
            }
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            anyhow::bail!("{}: unknown timezone '{}'", self.label(), self.timezone);
        }

        Ok(())
    }
}

/// One field mapping row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FieldMapping {
    pub id: Uuid,
    pub vendor_configuration_id: Uuid,
    pub record_kind: String,
    pub target_field: String,
    pub source_path: String,
    pub transform_rule: Option<String>,
    pub row_root: Option<String>,
    pub default_value: Option<String>,
    pub is_required: bool,
    pub sort_order: i32,
}

/// Read access to vendor configuration tables
#[derive(Debug, Clone)]
pub struct ConfigRepository {
    db: PgPool,
}

impl ConfigRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// All active vendor configurations, in a stable order
    pub async fn load_active(&self) -> Result<Vec<VendorConfiguration>> {
        let configs = sqlx::query_as::<_, VendorConfiguration>(
            r#"
            SELECT id, vendor_name, brand_id, outlet_id, terminal, gate, source_kind,
                   endpoint_url, auth_token, username, password, soap_action,
                   request_template, records_path, db_connection_string, db_query,
                   page_size, timezone, is_active, created_at, updated_at
            FROM vendor_configurations
            WHERE is_active
            ORDER BY vendor_name, brand_id, outlet_id
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("Failed to load vendor configurations")?;

        Ok(configs)
    }

    /// One configuration by id, active or not
    pub async fn find(&self, id: Uuid) -> Result<Option<VendorConfiguration>> {
        let config = sqlx::query_as::<_, VendorConfiguration>(
            r#"
            SELECT id, vendor_name, brand_id, outlet_id, terminal, gate, source_kind,
                   endpoint_url, auth_token, username, password, soap_action,
                   request_template, records_path, db_connection_string, db_query,
                   page_size, timezone, is_active, created_at, updated_at
            FROM vendor_configurations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("Failed to load vendor configuration")?;

        Ok(config)
    }

    /// Field mappings for one configuration, ordered for deterministic
    /// application
    pub async fn mappings_for(&self, config_id: Uuid) -> Result<Vec<FieldMapping>> {
        let mappings = sqlx::query_as::<_, FieldMapping>(
            r#"
            SELECT id, vendor_configuration_id, record_kind, target_field,
                   source_path, transform_rule, row_root, default_value,
                   is_required, sort_order
            FROM field_mappings
            WHERE vendor_configuration_id = $1
            ORDER BY record_kind, sort_order, target_field
            "#,
        )
        .bind(config_id)
        .fetch_all(&self.db)
        .await
        .context("Failed to load field mappings")?;

        Ok(mappings)
    }
}
