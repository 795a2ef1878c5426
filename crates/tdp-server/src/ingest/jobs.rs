//! Job definitions for vendor synchronization
//!
//! [`VendorSyncJob`] is the apalis queue payload for an on-demand sync of
//! one vendor configuration, outside the periodic cycle. A job may carry
//! the raw records itself; push-style vendors submit their batch rather
//! than exposing an endpoint to fetch from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queued request to sync a single vendor configuration now
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorSyncJob {
    /// Vendor configuration to sync
    pub vendor_configuration_id: Uuid,
    /// Raw records submitted with the job. When absent the worker fetches
    /// the vendor's current window instead.
    #[serde(default)]
    pub records: Option<Vec<serde_json::Value>>,
    /// Who or what asked for the sync
    pub triggered_by: Option<String>,
    /// Timestamp when the job was created
    pub created_at: DateTime<Utc>,
}

impl VendorSyncJob {
    pub fn new(vendor_configuration_id: Uuid) -> Self {
        Self {
            vendor_configuration_id,
            records: None,
            triggered_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_records(mut self, records: Vec<serde_json::Value>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_triggered_by(mut self, who: impl Into<String>) -> Self {
        self.triggered_by = Some(who.into());
        self
    }
}

/// Counters collected over one ingestion cycle
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    /// Vendor configurations that produced a log entry or a no-data pass
    pub configs_processed: usize,
    /// Vendor configurations that failed outright
    pub configs_failed: usize,
    pub records_fetched: usize,
    pub transactions_inserted: usize,
    pub duplicates_skipped: usize,
    pub records_errored: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl CycleStats {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Mark the cycle finished and fix its duration
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }
}
