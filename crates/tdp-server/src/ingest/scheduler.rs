//! Ingestion schedulers
//!
//! Two entry points into the pipeline: a periodic in-process cycle over
//! all active vendors, and an apalis job queue with PostgreSQL storage
//! for on-demand single-vendor syncs.

use anyhow::Result;
use apalis::prelude::*;
use apalis_postgres::PostgresStorage;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::config::IngestSettings;
use super::jobs::VendorSyncJob;
use super::models::IngestTrigger;
use super::orchestrator::IngestOrchestrator;

/// Periodic cycle scheduler
pub struct CycleScheduler {
    settings: IngestSettings,
    db: PgPool,
}

impl CycleScheduler {
    pub fn new(settings: IngestSettings, db: PgPool) -> Self {
        Self { settings, db }
    }

    /// Start the periodic loop. Returns the task handle together with a
    /// shutdown sender; send `true` to stop after the current cycle.
    pub fn start(self) -> Result<(JoinHandle<()>, tokio::sync::watch::Sender<bool>)> {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

        let orchestrator = IngestOrchestrator::new(self.settings.clone(), self.db)?;
        let period = self.settings.cycle_interval();
        let first_tick = if self.settings.run_on_startup {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + period
        };

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = period.as_secs(),
                "Ingestion scheduler started"
            );

            let mut ticker = tokio::time::interval_at(first_tick, period);
            // A slow cycle must not cause a burst of catch-up cycles.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = orchestrator.run_cycle().await {
                            error!(error = format!("{:#}", e), "Ingestion cycle failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Ingestion scheduler stopped");
        });

        Ok((handle, shutdown_tx))
    }
}

/// Job queue scheduler
pub struct JobScheduler {
    settings: IngestSettings,
    db: PgPool,
}

impl JobScheduler {
    pub fn new(settings: IngestSettings, db: PgPool) -> Self {
        Self { settings, db }
    }

    /// Start the queue worker
    ///
    /// This will:
    /// 1. Setup PostgreSQL storage for apalis
    /// 2. Start a worker task to process queued vendor syncs
    pub async fn start(self) -> Result<JoinHandle<()>> {
        info!("Starting job scheduler");

        let storage = self.setup_storage().await?;

        info!(
            "Job scheduler initialized with {} workers",
            self.settings.worker_threads
        );

        // Spawn the worker in a separate task
        // Monitor::register expects a factory closure that creates workers
        let handle = tokio::spawn(async move {
            info!("Job worker started");
            if let Err(e) = Monitor::new()
                .register(move |_index| {
                    WorkerBuilder::new("tdp-sync-worker")
                        .backend(storage.clone())
                        .build(process_vendor_sync_job)
                })
                .run()
                .await
            {
                tracing::error!("Job worker error: {:?}", e);
            }
            info!("Job worker stopped");
        });

        Ok(handle)
    }

    /// Setup PostgreSQL storage for apalis
    async fn setup_storage(&self) -> Result<PostgresStorage<VendorSyncJob>> {
        info!("Setting up PostgreSQL storage for apalis");

        // The apalis schema already exists from migration 20250301000008.
        let storage = PostgresStorage::new(&self.db);

        info!("Apalis storage setup complete");

        Ok(storage)
    }
}

/// Process a queued vendor sync
///
/// Runs the full pipeline for a single vendor configuration. The worker
/// opens its own small pool because apalis owns the job context here;
/// sync jobs are rare enough that the extra connections do not matter.
async fn process_vendor_sync_job(job: VendorSyncJob) -> Result<()> {
    info!(
        vendor_configuration_id = %job.vendor_configuration_id,
        triggered_by = job.triggered_by.as_deref().unwrap_or("unknown"),
        embedded_records = job.records.as_ref().map(|r| r.len()).unwrap_or(0),
        "Processing vendor sync job"
    );

    let mut db_config = crate::db::DbConfig::from_env()?;
    db_config.max_connections = 2;
    db_config.min_connections = 0;
    let pool = crate::db::create_pool(&db_config).await?;

    let settings = IngestSettings::from_env()?;
    let orchestrator = IngestOrchestrator::new(settings, pool.clone())?
        .with_trigger(IngestTrigger::Submitted);
    let result = match job.records {
        Some(records) => {
            orchestrator
                .run_submitted(job.vendor_configuration_id, records)
                .await
        }
        None => orchestrator.run_single(job.vendor_configuration_id).await,
    };
    pool.close().await;

    match result? {
        Some(report) => {
            info!(
                vendor_configuration_id = %job.vendor_configuration_id,
                fetched = report.fetched,
                inserted = report.inserted,
                duplicates = report.duplicates,
                errors = report.errors,
                "Vendor sync job completed"
            );
        }
        None => {
            info!(
                vendor_configuration_id = %job.vendor_configuration_id,
                "Vendor sync job found nothing to do"
            );
        }
    }

    Ok(())
}
