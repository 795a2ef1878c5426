//! Get ingestion log entry query
//!
//! Fetches a single log entry together with the exception rows recorded
//! during that cycle.

use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::list_entries::LogEntryItem;

/// Query to get one ingestion log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLogEntryQuery {
    pub entry_id: Uuid,
}

/// Exception recorded during an ingestion cycle
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExceptionItem {
    pub id: Uuid,
    pub vendor_configuration_id: Option<Uuid>,
    pub ingestion_log_id: Option<Uuid>,
    pub invoice_no: Option<String>,
    pub stage: String,
    pub error_message: String,
    pub record_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Response for get entry query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntryDetails {
    #[serde(flatten)]
    pub entry: LogEntryItem,
    pub exceptions: Vec<ExceptionItem>,
}

/// Error type for get entry query
#[derive(Debug, thiserror::Error)]
pub enum GetLogEntryError {
    #[error("Ingestion log entry not found: {0}")]
    NotFound(Uuid),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<LogEntryDetails, GetLogEntryError>> for GetLogEntryQuery {}

pub async fn handle(
    pool: PgPool,
    query: GetLogEntryQuery,
) -> Result<LogEntryDetails, GetLogEntryError> {
    let entry = sqlx::query_as::<_, LogEntryItem>(
        r#"
        SELECT id, vendor_configuration_id, vendor_name, brand_id, outlet_id,
               status, triggered_by, window_start, window_end, fetched_records,
               inserted_count, duplicate_count, error_count, payload_fingerprint,
               error_message, metadata, started_at, finished_at
        FROM pos_ingestion_log
        WHERE id = $1
        "#,
    )
    .bind(query.entry_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(GetLogEntryError::NotFound(query.entry_id))?;

    let exceptions = sqlx::query_as::<_, ExceptionItem>(
        r#"
        SELECT id, vendor_configuration_id, ingestion_log_id, invoice_no,
               stage, error_message, record_payload, created_at
        FROM pos_ingest_exceptions
        WHERE ingestion_log_id = $1
        ORDER BY created_at
        "#,
    )
    .bind(query.entry_id)
    .fetch_all(&pool)
    .await?;

    Ok(LogEntryDetails { entry, exceptions })
}
