//! List ingestion log entries query
//!
//! Query to list ingestion log entries, newest first, with optional
//! vendor and status filters.

use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Query to list ingestion log entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListLogEntriesQuery {
    /// Filter by vendor name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Filter by brand
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,
    /// Filter by outlet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlet_id: Option<String>,
    /// Filter by status (success, partial, failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Limit number of results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Offset for pagination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// Ingestion log list item
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogEntryItem {
    pub id: Uuid,
    pub vendor_configuration_id: Uuid,
    pub vendor_name: String,
    pub brand_id: String,
    pub outlet_id: String,
    pub status: String,
    pub triggered_by: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub fetched_records: i32,
    pub inserted_count: i32,
    pub duplicate_count: i32,
    pub error_count: i32,
    pub payload_fingerprint: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Response for list entries query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListLogEntriesResponse {
    pub entries: Vec<LogEntryItem>,
    pub total: i64,
}

/// Error type for list entries query
#[derive(Debug, thiserror::Error)]
pub enum ListLogEntriesError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<ListLogEntriesResponse, ListLogEntriesError>> for ListLogEntriesQuery {}

pub async fn handle(
    pool: PgPool,
    query: ListLogEntriesQuery,
) -> Result<ListLogEntriesResponse, ListLogEntriesError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut list_query = sqlx::QueryBuilder::new(
        "SELECT id, vendor_configuration_id, vendor_name, brand_id, outlet_id, \
         status, triggered_by, window_start, window_end, fetched_records, \
         inserted_count, duplicate_count, error_count, payload_fingerprint, \
         error_message, metadata, started_at, finished_at \
         FROM pos_ingestion_log WHERE 1=1",
    );
    push_filters(&mut list_query, &query);
    list_query.push(" ORDER BY started_at DESC LIMIT ");
    list_query.push_bind(limit);
    list_query.push(" OFFSET ");
    list_query.push_bind(offset);

    let entries = list_query
        .build_query_as::<LogEntryItem>()
        .fetch_all(&pool)
        .await?;

    let mut count_query =
        sqlx::QueryBuilder::new("SELECT COUNT(*) FROM pos_ingestion_log WHERE 1=1");
    push_filters(&mut count_query, &query);
    let total: i64 = count_query.build_query_scalar().fetch_one(&pool).await?;

    Ok(ListLogEntriesResponse { entries, total })
}

fn push_filters(
    builder: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>,
    query: &ListLogEntriesQuery,
) {
    if let Some(ref vendor) = query.vendor {
        builder.push(" AND vendor_name = ");
        builder.push_bind(vendor.clone());
    }
    if let Some(ref brand_id) = query.brand_id {
        builder.push(" AND brand_id = ");
        builder.push_bind(brand_id.clone());
    }
    if let Some(ref outlet_id) = query.outlet_id {
        builder.push(" AND outlet_id = ");
        builder.push_bind(outlet_id.clone());
    }
    if let Some(ref status) = query.status {
        builder.push(" AND status = ");
        builder.push_bind(status.to_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults() {
        let query = ListLogEntriesQuery {
            vendor: None,
            brand_id: None,
            outlet_id: None,
            status: None,
            limit: None,
            offset: None,
        };

        assert!(query.vendor.is_none());
        assert!(query.status.is_none());
    }

    #[test]
    fn test_list_query_deserializes_with_partial_filters() {
        let query: ListLogEntriesQuery = serde_json::from_value(serde_json::json!({
            "vendor": "simphony",
            "status": "failed",
            "limit": 25
        }))
        .expect("should deserialize");

        assert_eq!(query.vendor, Some("simphony".to_string()));
        assert_eq!(query.status, Some("failed".to_string()));
        assert_eq!(query.limit, Some(25));
        assert!(query.offset.is_none());
    }
}
