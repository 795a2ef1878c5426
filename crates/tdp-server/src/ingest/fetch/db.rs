//! Direct database fetch strategy
//!
//! Runs a configured read-only query against a vendor's Postgres and turns
//! each row into a JSON object keyed by column name, so downstream mapping
//! works exactly as it does for HTTP sources. A fresh two-connection pool
//! is opened per fetch and closed afterwards; vendor databases are not
//! part of the application pool.
//!
//! NUMERIC columns are emitted as strings to preserve scale, and
//! TIMESTAMPTZ columns as UTC wall time, so such vendors should be
//! configured with the UTC timezone.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::BigDecimal;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use tdp_common::fingerprint::json_fingerprint;

use super::{render_placeholders, FetchError, FetchWindow, FetchedPayload, VendorFetcher};
use crate::ingest::config::VendorConfiguration;

#[derive(Default)]
pub struct DbFetcher;

impl DbFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VendorFetcher for DbFetcher {
    async fn fetch(
        &self,
        config: &VendorConfiguration,
        window: FetchWindow,
    ) -> Result<FetchedPayload, FetchError> {
        let conn = config
            .db_connection_string
            .as_deref()
            .ok_or_else(|| FetchError::Config("db_connection_string is not set".to_string()))?;
        let query_template = config
            .db_query
            .as_deref()
            .ok_or_else(|| FetchError::Config("db_query is not set".to_string()))?;

        validate_vendor_query(query_template)?;
        let sql = render_placeholders(query_template, config, window, None);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(conn)
            .await
            .map_err(|e| connect_error(e, config))?;

        let result = sqlx::query(&sql).fetch_all(&pool).await;
        pool.close().await;

        let rows = result.map_err(query_error)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(row_to_json(row)?);
        }
        debug!(vendor = %config.label(), records = records.len(), "Fetched database rows");

        let combined = Value::Array(records);
        let fingerprint = json_fingerprint(&combined).ok();
        let records = match combined {
            Value::Array(records) => records,
            _ => Vec::new(),
        };

        Ok(FetchedPayload { records, fingerprint })
    }
}

/// Vendor queries must be reads.
fn validate_vendor_query(sql: &str) -> Result<(), FetchError> {
    let head = sql.trim_start().to_lowercase();
    if head.starts_with("select") || head.starts_with("with") {
        Ok(())
    } else {
        Err(FetchError::Config(
            "db_query must be a SELECT or WITH statement".to_string(),
        ))
    }
}

fn connect_error(e: sqlx::Error, config: &VendorConfiguration) -> FetchError {
    match &e {
        sqlx::Error::PoolTimedOut => {
            FetchError::Timeout(format!("connecting to {} vendor database", config.label()))
        }
        sqlx::Error::Database(db) if db.message().contains("password authentication") => {
            FetchError::Auth(db.message().to_string())
        }
        _ => FetchError::Transport(format!("vendor database connection failed: {}", e)),
    }
}

fn query_error(e: sqlx::Error) -> FetchError {
    match &e {
        sqlx::Error::PoolTimedOut => FetchError::Timeout("vendor database query".to_string()),
        _ => FetchError::Transport(format!("vendor database query failed: {}", e)),
    }
}

fn row_to_json(row: &PgRow) -> Result<Value, FetchError> {
    let mut record = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = postgres_value_to_json(row, index, column.type_info().name())?;
        record.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(record))
}

/// Decode one column into a JSON value based on its Postgres type name.
fn postgres_value_to_json(row: &PgRow, index: usize, type_name: &str) -> Result<Value, FetchError> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| decode_error(index, &e))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => json!(row
            .try_get::<bool, _>(index)
            .map_err(|e| decode_error(index, &e))?),
        "INT2" => json!(row
            .try_get::<i16, _>(index)
            .map_err(|e| decode_error(index, &e))?),
        "INT4" => json!(row
            .try_get::<i32, _>(index)
            .map_err(|e| decode_error(index, &e))?),
        "INT8" => json!(row
            .try_get::<i64, _>(index)
            .map_err(|e| decode_error(index, &e))?),
        "FLOAT4" => json!(row
            .try_get::<f32, _>(index)
            .map_err(|e| decode_error(index, &e))?),
        "FLOAT8" => json!(row
            .try_get::<f64, _>(index)
            .map_err(|e| decode_error(index, &e))?),
        "NUMERIC" => Value::String(
            row.try_get::<BigDecimal, _>(index)
                .map_err(|e| decode_error(index, &e))?
                .to_string(),
        ),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => Value::String(
            row.try_get::<String, _>(index)
                .map_err(|e| decode_error(index, &e))?,
        ),
        "UUID" => Value::String(
            row.try_get::<Uuid, _>(index)
                .map_err(|e| decode_error(index, &e))?
                .to_string(),
        ),
        "DATE" => Value::String(
            row.try_get::<chrono::NaiveDate, _>(index)
                .map_err(|e| decode_error(index, &e))?
                .format("%Y-%m-%d")
                .to_string(),
        ),
        "TIME" => Value::String(
            row.try_get::<chrono::NaiveTime, _>(index)
                .map_err(|e| decode_error(index, &e))?
                .format("%H:%M:%S")
                .to_string(),
        ),
        "TIMESTAMP" => Value::String(
            row.try_get::<chrono::NaiveDateTime, _>(index)
                .map_err(|e| decode_error(index, &e))?
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)
                .map_err(|e| decode_error(index, &e))?
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        "JSON" | "JSONB" => row
            .try_get::<Value, _>(index)
            .map_err(|e| decode_error(index, &e))?,
        other => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or_else(|_| Value::String(format!("<{}>", other))),
    };

    Ok(value)
}

fn decode_error(index: usize, e: &dyn std::fmt::Display) -> FetchError {
    FetchError::Malformed(format!("failed to decode column {}: {}", index, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_query_must_be_a_read() {
        assert!(validate_vendor_query("SELECT * FROM sales").is_ok());
        assert!(validate_vendor_query("  with s as (select 1) select * from s").is_ok());
        assert!(validate_vendor_query("DELETE FROM sales").is_err());
        assert!(validate_vendor_query("UPDATE sales SET x = 1").is_err());
        assert!(validate_vendor_query("").is_err());
    }
}
