//! List ingest exceptions query
//!
//! Query over per-record ingestion failures, newest first. The raw
//! record payload is returned verbatim so failures can be diagnosed
//! without re-fetching from the vendor.

use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Query to list ingest exceptions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListExceptionsQuery {
    /// Filter by vendor configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_configuration_id: Option<Uuid>,
    /// Filter by pipeline stage (map, assemble, insert)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Filter by invoice number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_no: Option<String>,
    /// Limit number of results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Offset for pagination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// Exception list item
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExceptionListItem {
    pub id: Uuid,
    pub vendor_configuration_id: Option<Uuid>,
    pub ingestion_log_id: Option<Uuid>,
    pub invoice_no: Option<String>,
    pub stage: String,
    pub error_message: String,
    pub record_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Response for list exceptions query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListExceptionsResponse {
    pub exceptions: Vec<ExceptionListItem>,
    pub total: i64,
}

/// Error type for list exceptions query
#[derive(Debug, thiserror::Error)]
pub enum ListExceptionsError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<ListExceptionsResponse, ListExceptionsError>> for ListExceptionsQuery {}

pub async fn handle(
    pool: PgPool,
    query: ListExceptionsQuery,
) -> Result<ListExceptionsResponse, ListExceptionsError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut list_query = sqlx::QueryBuilder::new(
        "SELECT id, vendor_configuration_id, ingestion_log_id, invoice_no, \
         stage, error_message, record_payload, created_at \
         FROM pos_ingest_exceptions WHERE 1=1",
    );
    push_filters(&mut list_query, &query);
    list_query.push(" ORDER BY created_at DESC LIMIT ");
    list_query.push_bind(limit);
    list_query.push(" OFFSET ");
    list_query.push_bind(offset);

    let exceptions = list_query
        .build_query_as::<ExceptionListItem>()
        .fetch_all(&pool)
        .await?;

    let mut count_query =
        sqlx::QueryBuilder::new("SELECT COUNT(*) FROM pos_ingest_exceptions WHERE 1=1");
    push_filters(&mut count_query, &query);
    let total: i64 = count_query.build_query_scalar().fetch_one(&pool).await?;

    Ok(ListExceptionsResponse { exceptions, total })
}

fn push_filters(
    builder: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>,
    query: &ListExceptionsQuery,
) {
    if let Some(config_id) = query.vendor_configuration_id {
        builder.push(" AND vendor_configuration_id = ");
        builder.push_bind(config_id);
    }
    if let Some(ref stage) = query.stage {
        builder.push(" AND stage = ");
        builder.push_bind(stage.to_lowercase());
    }
    if let Some(ref invoice_no) = query.invoice_no {
        builder.push(" AND invoice_no = ");
        builder.push_bind(invoice_no.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults() {
        let query = ListExceptionsQuery {
            vendor_configuration_id: None,
            stage: None,
            invoice_no: None,
            limit: None,
            offset: None,
        };

        assert!(query.stage.is_none());
        assert!(query.invoice_no.is_none());
    }

    #[test]
    fn test_list_query_round_trips() {
        let query = ListExceptionsQuery {
            vendor_configuration_id: Some(Uuid::new_v4()),
            stage: Some("insert".to_string()),
            invoice_no: Some("INV-1".to_string()),
            limit: Some(10),
            offset: Some(0),
        };

        let json = serde_json::to_value(&query).unwrap();
        let back: ListExceptionsQuery = serde_json::from_value(json).unwrap();
        assert_eq!(back.stage, Some("insert".to_string()));
        assert_eq!(back.invoice_no, Some("INV-1".to_string()));
    }
}
