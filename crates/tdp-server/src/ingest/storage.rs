//! Transaction and ingestion-log persistence
//!
//! A batch is written inside one database transaction, with a savepoint
//! per record: header first, then the aggregated item row, then one row
//! per payment. A failure
//! rolls back that record's savepoint alone, the batch keeps going and
//! the failure lands in `pos_ingest_exceptions`. A failure of the batch
//! transaction itself rolls everything back and propagates. The
//! natural-key ON CONFLICT guard makes re-ingestion of an already-seen
//! window a no-op.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

use super::config::VendorConfiguration;
use super::models::{NewIngestionLog, PosTransaction};

/// Counts for one inserted batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    pub errored: usize,
}

#[derive(Debug, Clone)]
pub struct TransactionStorage {
    db: PgPool,
}

impl TransactionStorage {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Insert a batch inside one database transaction, isolating each
    /// record behind its own savepoint. Partial success commits; only a
    /// failure of the batch transaction itself propagates.
    pub async fn insert_batch(
        &self,
        config: &VendorConfiguration,
        log_id: Uuid,
        transactions: &[PosTransaction],
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        let mut tx = self
            .db
            .begin()
            .await
            .context("Failed to begin batch transaction")?;

        for txn in transactions {
            let mut savepoint = tx
                .begin()
                .await
                .context("Failed to open record savepoint")?;

            match insert_one(&mut savepoint, txn, log_id).await {
                Ok(true) => {
                    savepoint
                        .commit()
                        .await
                        .context("Failed to release record savepoint")?;
                    outcome.inserted += 1;
                }
                Ok(false) => {
                    savepoint
                        .commit()
                        .await
                        .context("Failed to release record savepoint")?;
                    outcome.duplicates += 1;
                    debug!(invoice = %txn.invoice_no, "Skipping duplicate transaction");
                }
                Err(e) => {
                    // A rollback failure means the connection is gone,
                    // which fails the whole batch.
                    savepoint
                        .rollback()
                        .await
                        .context("Failed to roll back record savepoint")?;
                    outcome.errored += 1;
                    error!(
                        invoice = %txn.invoice_no,
                        error = format!("{:#}", e),
                        "Failed to insert transaction"
                    );
                    // Exceptions go through the pool, outside the batch
                    // transaction; their failure must not take the batch
                    // down with it.
                    if let Err(log_err) = self
                        .record_exception(
                            Some(config.id),
                            Some(log_id),
                            Some(&txn.invoice_no),
                            "insert",
                            &format!("{:#}", e),
                            Some(&insert_failure_payload(txn)),
                        )
                        .await
                    {
                        error!(error = format!("{:#}", log_err), "Failed to record exception");
                    }
                }
            }
        }

        tx.commit().await.context("Failed to commit batch transaction")?;

        Ok(outcome)
    }

    /// Record one failed record without failing the caller's flow
    pub async fn record_exception(
        &self,
        config_id: Option<Uuid>,
        log_id: Option<Uuid>,
        invoice_no: Option<&str>,
        stage: &str,
        message: &str,
        payload: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pos_ingest_exceptions (
                vendor_configuration_id, ingestion_log_id, invoice_no,
                stage, error_message, record_payload
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(config_id)
        .bind(log_id)
        .bind(invoice_no)
        .bind(stage)
        .bind(message)
        .bind(payload)
        .execute(&self.db)
        .await
        .context("Failed to record ingestion exception")?;

        Ok(())
    }
}

/// Insert one transaction inside the caller's savepoint. Returns false
/// when the natural key already exists.
async fn insert_one(
    tx: &mut Transaction<'_, Postgres>,
    txn: &PosTransaction,
    log_id: Uuid,
) -> Result<bool> {
    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO pos_transactions (
            invoice_no, brand_id, outlet_id, terminal, gate, vendor_name,
            transaction_at, gross_amount, discount_amount, tax_amount,
            net_amount, cover_count, ingestion_log_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (invoice_no, brand_id, outlet_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&txn.invoice_no)
    .bind(&txn.brand_id)
    .bind(&txn.outlet_id)
    .bind(&txn.terminal)
    .bind(&txn.gate)
    .bind(&txn.vendor_name)
    .bind(txn.transaction_at)
    .bind(&txn.gross_amount)
    .bind(&txn.discount_amount)
    .bind(&txn.tax_amount)
    .bind(&txn.net_amount)
    .bind(txn.cover_count)
    .bind(log_id)
    .fetch_optional(&mut **tx)
    .await
    .context("Failed to insert transaction header")?;

    let Some(transaction_id) = inserted else {
        return Ok(false);
    };

    if !txn.lines.is_empty() {
        let item_codes: Vec<String> = txn.lines.iter().map(|l| l.item_code.clone()).collect();
        let item_names: Vec<String> = txn
            .lines
            .iter()
            .map(|l| l.item_name.clone().unwrap_or_default())
            .collect();
        let quantities: Vec<BigDecimal> = txn.lines.iter().map(|l| l.quantity.clone()).collect();
        let unit_prices: Vec<BigDecimal> = txn.lines.iter().map(|l| l.unit_price.clone()).collect();
        let line_totals: Vec<BigDecimal> = txn.lines.iter().map(|l| l.line_total.clone()).collect();

        sqlx::query(
            r#"
            INSERT INTO pos_transaction_items (
                transaction_id, invoice_no, brand_id, outlet_id,
                item_codes, item_names, quantities, unit_prices, line_totals
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (invoice_no, brand_id, outlet_id) DO NOTHING
            "#,
        )
        .bind(transaction_id)
        .bind(&txn.invoice_no)
        .bind(&txn.brand_id)
        .bind(&txn.outlet_id)
        .bind(&item_codes)
        .bind(&item_names)
        .bind(&quantities)
        .bind(&unit_prices)
        .bind(&line_totals)
        .execute(&mut **tx)
        .await
        .context("Failed to insert transaction items")?;
    }

    if !txn.payments.is_empty() {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO pos_transaction_payments (
                transaction_id, invoice_no, brand_id, outlet_id, method, amount
            )
            "#,
        );

        query_builder.push_values(txn.payments.iter(), |mut b, payment| {
            b.push_bind(transaction_id)
                .push_bind(&txn.invoice_no)
                .push_bind(&txn.brand_id)
                .push_bind(&txn.outlet_id)
                .push_bind(&payment.method)
                .push_bind(&payment.amount);
        });

        query_builder
            .build()
            .execute(&mut **tx)
            .await
            .context("Failed to insert transaction payments")?;
    }

    Ok(true)
}

fn insert_failure_payload(txn: &PosTransaction) -> Value {
    json!({
        "invoice_no": txn.invoice_no,
        "brand_id": txn.brand_id,
        "outlet_id": txn.outlet_id,
        "terminal": txn.terminal,
        "gate": txn.gate,
        "vendor_name": txn.vendor_name,
        "transaction_at": txn.transaction_at.to_rfc3339(),
        "line_count": txn.lines.len(),
        "payment_count": txn.payments.len(),
    })
}

#[derive(Debug, Clone)]
pub struct IngestionLogStore {
    db: PgPool,
}

impl IngestionLogStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Persist a finished cycle's log entry under its pre-assigned id
    pub async fn record(&self, entry: &NewIngestionLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pos_ingestion_log (
                id, vendor_configuration_id, vendor_name, brand_id, outlet_id,
                status, triggered_by, window_start, window_end, fetched_records,
                inserted_count, duplicate_count, error_count,
                payload_fingerprint, error_message, metadata, started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17)
            "#,
        )
        .bind(entry.id)
        .bind(entry.vendor_configuration_id)
        .bind(&entry.vendor_name)
        .bind(&entry.brand_id)
        .bind(&entry.outlet_id)
        .bind(entry.status.as_str())
        .bind(entry.triggered_by.as_str())
        .bind(entry.window_start)
        .bind(entry.window_end)
        .bind(entry.fetched_records)
        .bind(entry.inserted_count)
        .bind(entry.duplicate_count)
        .bind(entry.error_count)
        .bind(&entry.payload_fingerprint)
        .bind(&entry.error_message)
        .bind(&entry.metadata)
        .bind(entry.started_at)
        .execute(&self.db)
        .await
        .context("Failed to record ingestion log entry")?;

        Ok(())
    }

    /// Window end of the vendor's most recent successful cycle, the
    /// high-water mark for incremental fetching
    pub async fn last_success_window_end(
        &self,
        config_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>> {
        let window_end: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT window_end FROM pos_ingestion_log
            WHERE vendor_configuration_id = $1 AND status = 'success'
            ORDER BY window_end DESC
            LIMIT 1
            "#,
        )
        .bind(config_id)
        .fetch_optional(&self.db)
        .await
        .context("Failed to read ingestion high-water mark")?;

        Ok(window_end)
    }
}
