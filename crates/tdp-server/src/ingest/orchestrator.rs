//! Ingestion cycle orchestration
//!
//! Drives fetch, map, correlate and insert for every active vendor
//! configuration. Failure isolation is layered: a failing record becomes
//! an exception row while its batch continues, and a failing vendor
//! writes a failed log entry while the cycle moves on to the next vendor.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{ConfigRepository, IngestSettings, VendorConfiguration};
use super::correlate::{assemble_transaction, group_records};
use super::fetch::{self, FetchWindow};
use super::jobs::CycleStats;
use super::mapping::MappingEngine;
use super::models::{IngestTrigger, IngestionStatus, NewIngestionLog, RawRecord};
use super::storage::{BatchOutcome, IngestionLogStore, TransactionStorage};
use tdp_common::fingerprint::payload_fingerprint;

/// Outcome of one vendor pass that fetched data
#[derive(Debug, Clone, Copy)]
pub struct VendorReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: usize,
}

pub struct IngestOrchestrator {
    settings: IngestSettings,
    repo: ConfigRepository,
    storage: TransactionStorage,
    log_store: IngestionLogStore,
    http: reqwest::Client,
    trigger: IngestTrigger,
}

impl IngestOrchestrator {
    pub fn new(settings: IngestSettings, db: PgPool) -> Result<Self> {
        let http =
            fetch::build_http_client(settings.http_timeout(), settings.http_connect_timeout())?;
        Ok(Self {
            repo: ConfigRepository::new(db.clone()),
            storage: TransactionStorage::new(db.clone()),
            log_store: IngestionLogStore::new(db),
            http,
            settings,
            trigger: IngestTrigger::Schedule,
        })
    }

    /// Label log entries with a different run trigger. The queue worker
    /// marks its runs as submitted.
    pub fn with_trigger(mut self, trigger: IngestTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Run one cycle over all active vendor configurations
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let mut stats = CycleStats::new();

        let configs = self.repo.load_active().await?;
        if configs.is_empty() {
            info!("No active vendor configurations");
            stats.complete();
            return Ok(stats);
        }

        info!(configs = configs.len(), "Starting ingestion cycle");

        for config in &configs {
            match self.run_for_config(config).await {
                Ok(Some(report)) => {
                    stats.configs_processed += 1;
                    stats.records_fetched += report.fetched;
                    stats.transactions_inserted += report.inserted;
                    stats.duplicates_skipped += report.duplicates;
                    stats.records_errored += report.errors;
                }
                Ok(None) => {
                    stats.configs_processed += 1;
                    debug!(vendor = %config.label(), "No records in window");
                }
                Err(e) => {
                    stats.configs_failed += 1;
                    error!(
                        vendor = %config.label(),
                        error = format!("{:#}", e),
                        "Vendor ingestion failed"
                    );
                }
            }
        }

        stats.complete();
        info!(
            processed = stats.configs_processed,
            failed = stats.configs_failed,
            fetched = stats.records_fetched,
            inserted = stats.transactions_inserted,
            duplicates = stats.duplicates_skipped,
            errors = stats.records_errored,
            duration_secs = stats.duration_secs,
            "Ingestion cycle finished"
        );
        Ok(stats)
    }

    /// Sync one configuration immediately, the queued-job path
    pub async fn run_single(&self, config_id: Uuid) -> Result<Option<VendorReport>> {
        match self.load_active_config(config_id).await? {
            Some(config) => self.run_for_config(&config).await,
            None => Ok(None),
        }
    }

    /// Ingest a batch the vendor pushed to us instead of one we fetched.
    /// The window collapses to the arrival instant; a submitted batch has
    /// no fetch window of its own.
    pub async fn run_submitted(
        &self,
        config_id: Uuid,
        records: Vec<RawRecord>,
    ) -> Result<Option<VendorReport>> {
        let Some(config) = self.load_active_config(config_id).await? else {
            return Ok(None);
        };
        if records.is_empty() {
            debug!(vendor = %config.label(), "Submitted batch is empty, skipping log entry");
            return Ok(None);
        }

        let started_at = Utc::now();
        let window = FetchWindow {
            since: started_at,
            until: started_at,
        };
        let fingerprint = serde_json::to_vec(&records)
            .ok()
            .map(|bytes| payload_fingerprint(&bytes));

        match self
            .process_records(&config, &records, fingerprint, window, started_at)
            .await
        {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                let entry =
                    failed_entry(&config, window, started_at, self.trigger, &format!("{:#}", e));
                if let Err(log_err) = self.log_store.record(&entry).await {
                    error!(
                        vendor = %config.label(),
                        error = format!("{:#}", log_err),
                        "Failed to record failed ingestion"
                    );
                }
                Err(e)
            }
        }
    }

    async fn load_active_config(&self, config_id: Uuid) -> Result<Option<VendorConfiguration>> {
        let config = self
            .repo
            .find(config_id)
            .await?
            .with_context(|| format!("Vendor configuration {} not found", config_id))?;

        if !config.is_active {
            warn!(vendor = %config.label(), "Skipping inactive vendor configuration");
            return Ok(None);
        }

        Ok(Some(config))
    }

    /// One vendor pass. Failures after the window is computed leave a
    /// failed log entry behind before propagating.
    async fn run_for_config(&self, config: &VendorConfiguration) -> Result<Option<VendorReport>> {
        let started_at = Utc::now();
        let window = self.window_for(config, started_at).await?;

        match self.ingest_vendor(config, window, started_at).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let entry =
                    failed_entry(config, window, started_at, self.trigger, &format!("{:#}", e));
                if let Err(log_err) = self.log_store.record(&entry).await {
                    error!(
                        vendor = %config.label(),
                        error = format!("{:#}", log_err),
                        "Failed to record failed ingestion"
                    );
                }
                Err(e)
            }
        }
    }

    /// Incremental window: resume from the last successful window end, or
    /// look back the configured number of hours for a fresh vendor.
    async fn window_for(
        &self,
        config: &VendorConfiguration,
        until: DateTime<Utc>,
    ) -> Result<FetchWindow> {
        let since = self
            .log_store
            .last_success_window_end(config.id)
            .await?
            .unwrap_or_else(|| until - self.settings.lookback());
        Ok(FetchWindow { since, until })
    }

    async fn ingest_vendor(
        &self,
        config: &VendorConfiguration,
        window: FetchWindow,
        started_at: DateTime<Utc>,
    ) -> Result<Option<VendorReport>> {
        config.validate()?;
        let kind = config.source_kind()?;

        let fetcher = fetch::fetcher_for(kind, self.http.clone(), self.settings.max_pages);
        let payload = fetcher
            .fetch(config, window)
            .await
            .with_context(|| format!("Fetch failed for {}", config.label()))?;

        if payload.records.is_empty() {
            debug!(vendor = %config.label(), "Fetched no records, skipping log entry");
            return Ok(None);
        }

        let report = self
            .process_records(
                config,
                &payload.records,
                payload.fingerprint.clone(),
                window,
                started_at,
            )
            .await?;
        Ok(Some(report))
    }

    /// Map, correlate and insert one batch of raw records, closing with an
    /// ingestion log entry. Shared by the fetched and submitted paths.
    async fn process_records(
        &self,
        config: &VendorConfiguration,
        records: &[RawRecord],
        fingerprint: Option<String>,
        window: FetchWindow,
        started_at: DateTime<Utc>,
    ) -> Result<VendorReport> {
        let fetched = records.len();

        let mappings = self.repo.mappings_for(config.id).await?;
        if mappings.is_empty() {
            anyhow::bail!("No field mappings configured for {}", config.label());
        }
        let engine = MappingEngine::new(&config.timezone, mappings)?;

        let log_id = Uuid::new_v4();
        let mut mapped = Vec::new();
        let mut mapping_failures = 0usize;

        for raw in records {
            let (records, failures) = engine.map_record(raw);
            mapped.extend(records);
            for failure in failures {
                mapping_failures += 1;
                self.log_exception(
                    config,
                    log_id,
                    None,
                    "map",
                    &failure.message,
                    Some(&failure.source),
                )
                .await;
            }
        }

        let (groups, orphans) = group_records(mapped);
        let orphan_count = orphans.len();
        if orphan_count > 0 {
            warn!(
                vendor = %config.label(),
                orphans = orphan_count,
                "Discarding records with no matching header"
            );
        }

        let mut transactions = Vec::with_capacity(groups.len());
        let mut assembly_failures = 0usize;
        for group in groups {
            let invoice = group.key.clone();
            match assemble_transaction(group, engine.timezone(), config) {
                Ok(txn) => transactions.push(txn),
                Err(e) => {
                    assembly_failures += 1;
                    self.log_exception(
                        config,
                        log_id,
                        Some(&invoice),
                        "assemble",
                        &e.to_string(),
                        None,
                    )
                    .await;
                }
            }
        }

        let outcome = self
            .storage
            .insert_batch(config, log_id, &transactions)
            .await?;
        let failed_records = mapping_failures + assembly_failures;
        let error_count = outcome.errored + failed_records;
        let status = derive_status(&outcome, failed_records);

        let entry = NewIngestionLog {
            id: log_id,
            vendor_configuration_id: config.id,
            vendor_name: config.vendor_name.clone(),
            brand_id: config.brand_id.clone(),
            outlet_id: config.outlet_id.clone(),
            status,
            triggered_by: self.trigger,
            window_start: window.since,
            window_end: window.until,
            fetched_records: fetched as i32,
            inserted_count: outcome.inserted as i32,
            duplicate_count: outcome.duplicates as i32,
            error_count: error_count as i32,
            payload_fingerprint: fingerprint,
            error_message: None,
            metadata: Some(json!({
                "mapping_failures": mapping_failures,
                "assembly_failures": assembly_failures,
                "orphaned_records": orphan_count,
            })),
            started_at,
        };
        self.log_store.record(&entry).await?;

        info!(
            vendor = %config.label(),
            status = %status,
            fetched,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            errors = error_count,
            "Vendor ingestion finished"
        );

        Ok(VendorReport {
            fetched,
            inserted: outcome.inserted,
            duplicates: outcome.duplicates,
            errors: error_count,
        })
    }

    async fn log_exception(
        &self,
        config: &VendorConfiguration,
        log_id: Uuid,
        invoice_no: Option<&str>,
        stage: &str,
        message: &str,
        payload: Option<&serde_json::Value>,
    ) {
        if let Err(e) = self
            .storage
            .record_exception(Some(config.id), Some(log_id), invoice_no, stage, message, payload)
            .await
        {
            error!(
                vendor = %config.label(),
                error = format!("{:#}", e),
                "Failed to record exception"
            );
        }
    }
}

/// Success when nothing failed, partial when anything landed alongside
/// failures, failed when nothing landed at all. A window of pure
/// duplicates is a success; re-ingestion is expected to be a no-op.
pub(crate) fn derive_status(outcome: &BatchOutcome, other_failures: usize) -> IngestionStatus {
    let error_count = outcome.errored + other_failures;
    if error_count == 0 {
        IngestionStatus::Success
    } else if outcome.inserted > 0 || outcome.duplicates > 0 {
        IngestionStatus::Partial
    } else {
        IngestionStatus::Failed
    }
}

fn failed_entry(
    config: &VendorConfiguration,
    window: FetchWindow,
    started_at: DateTime<Utc>,
    trigger: IngestTrigger,
    message: &str,
) -> NewIngestionLog {
    NewIngestionLog {
        id: Uuid::new_v4(),
        vendor_configuration_id: config.id,
        vendor_name: config.vendor_name.clone(),
        brand_id: config.brand_id.clone(),
        outlet_id: config.outlet_id.clone(),
        status: IngestionStatus::Failed,
        triggered_by: trigger,
        window_start: window.since,
        window_end: window.until,
        fetched_records: 0,
        inserted_count: 0,
        duplicate_count: 0,
        error_count: 0,
        payload_fingerprint: None,
        error_message: Some(message.to_string()),
        metadata: None,
        started_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(inserted: usize, duplicates: usize, errored: usize) -> BatchOutcome {
        BatchOutcome {
            inserted,
            duplicates,
            errored,
        }
    }

    #[test]
    fn test_clean_batch_is_success() {
        assert_eq!(derive_status(&outcome(3, 0, 0), 0), IngestionStatus::Success);
    }

    #[test]
    fn test_all_duplicates_is_success() {
        assert_eq!(derive_status(&outcome(0, 3, 0), 0), IngestionStatus::Success);
    }

    #[test]
    fn test_mixed_batch_is_partial() {
        assert_eq!(derive_status(&outcome(2, 0, 1), 0), IngestionStatus::Partial);
        assert_eq!(derive_status(&outcome(1, 1, 0), 2), IngestionStatus::Partial);
    }

    #[test]
    fn test_nothing_landed_is_failed() {
        assert_eq!(derive_status(&outcome(0, 0, 3), 0), IngestionStatus::Failed);
        assert_eq!(derive_status(&outcome(0, 0, 0), 5), IngestionStatus::Failed);
    }
}
