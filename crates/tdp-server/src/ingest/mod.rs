//! Transaction ingestion pipeline
//!
//! Pulls sales transactions from heterogeneous vendor endpoints (REST,
//! SOAP, raw XML, paginated REST, direct SQL), maps the raw payloads
//! through database-stored field mappings, correlates headers with
//! their item and payment records, and inserts assembled transactions
//! idempotently. Every cycle leaves an ingestion log entry behind and
//! per-record failures become exception rows instead of aborting the
//! batch.

pub mod config;
pub mod correlate;
pub mod fetch;
pub mod jobs;
pub mod mapping;
pub mod models;
pub mod orchestrator;
pub mod path;
pub mod scheduler;
pub mod storage;
pub mod transform;

pub use config::{ConfigRepository, IngestSettings, SourceKind, VendorConfiguration};
pub use orchestrator::IngestOrchestrator;
pub use scheduler::{CycleScheduler, JobScheduler};

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

/// Startup sanity pass over the stored vendor configurations.
///
/// Problems are logged, not fatal; a broken configuration fails its own
/// cycles while the rest of the platform runs.
pub async fn validate_configurations(db: &PgPool) -> Result<()> {
    let repo = ConfigRepository::new(db.clone());
    let configs = repo.load_active().await?;

    let mut invalid = 0usize;
    for config in &configs {
        if let Err(e) = config.validate() {
            invalid += 1;
            warn!(
                vendor = %config.label(),
                error = format!("{:#}", e),
                "Invalid vendor configuration"
            );
        } else if repo.mappings_for(config.id).await?.is_empty() {
            invalid += 1;
            warn!(
                vendor = %config.label(),
                "Vendor configuration has no field mappings"
            );
        }
    }

    info!(
        active = configs.len(),
        invalid, "Vendor configuration check finished"
    );
    Ok(())
}
