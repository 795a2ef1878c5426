//! Schema migration tests against a pristine containerized database
//!
//! These tests require Docker to be running. Run with:
//!
//! ```bash
//! cargo test --test migration_tests -- --ignored --nocapture
//! ```

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

/// Start a pristine Postgres container and connect to it. The container
/// handle must stay alive for the duration of the test.
async fn fresh_database() -> Result<(ContainerAsync<Postgres>, PgPool)> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let conn_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&conn_string)
        .await?;

    Ok((container, pool))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_migrations_apply_on_pristine_database() -> Result<()> {
    let (_container, pool) = fresh_database().await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    // Re-running must be a no-op thanks to the migrations table.
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'",
    )
    .fetch_all(&pool)
    .await?;

    for expected in [
        "vendor_configurations",
        "field_mappings",
        "pos_ingestion_log",
        "pos_transactions",
        "pos_transaction_items",
        "pos_transaction_payments",
        "pos_ingest_exceptions",
    ] {
        assert!(
            tables.iter().any(|t| t == expected),
            "missing table {}",
            expected
        );
    }

    let apalis_jobs: Option<String> = sqlx::query_scalar("SELECT to_regclass('apalis.jobs')::text")
        .fetch_one(&pool)
        .await?;
    assert!(apalis_jobs.is_some(), "apalis queue table not created");

    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_schema_enforces_transaction_natural_key() -> Result<()> {
    let (_container, pool) = fresh_database().await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let insert = r#"
        INSERT INTO pos_transactions (invoice_no, brand_id, outlet_id, vendor_name, transaction_at)
        VALUES ('INV-1', 'BR-1', 'OUT-1', 'simphony', NOW())
    "#;

    sqlx::query(insert).execute(&pool).await?;

    let err = sqlx::query(insert).execute(&pool).await.unwrap_err();
    assert!(
        err.to_string().contains("duplicate key"),
        "expected a unique violation, got {}",
        err
    );

    // The insertion path relies on ON CONFLICT resolving this silently.
    let result = sqlx::query(
        r#"
        INSERT INTO pos_transactions (invoice_no, brand_id, outlet_id, vendor_name, transaction_at)
        VALUES ('INV-1', 'BR-1', 'OUT-1', 'simphony', NOW())
        ON CONFLICT (invoice_no, brand_id, outlet_id) DO NOTHING
        "#,
    )
    .execute(&pool)
    .await?;
    assert_eq!(result.rows_affected(), 0);

    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_schema_cascade_and_detach_rules() -> Result<()> {
    let (_container, pool) = fresh_database().await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let config_id: uuid::Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO vendor_configurations (vendor_name, brand_id, outlet_id, source_kind)
        VALUES ('simphony', 'BR-1', 'OUT-1', 'api')
        RETURNING id
        "#,
    )
    .fetch_one(&pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO field_mappings (vendor_configuration_id, record_kind, target_field, source_path)
        VALUES ($1, 'header', 'invoice_no', 'invoiceNumber')
        "#,
    )
    .bind(config_id)
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO pos_ingestion_log (
            vendor_configuration_id, vendor_name, brand_id, outlet_id, status,
            window_start, window_end, fetched_records, inserted_count,
            duplicate_count, error_count, started_at
        )
        VALUES ($1, 'simphony', 'BR-1', 'OUT-1', 'success', NOW(), NOW(), 0, 0, 0, 0, NOW())
        "#,
    )
    .bind(config_id)
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO pos_ingest_exceptions (vendor_configuration_id, stage, error_message)
        VALUES ($1, 'map', 'boom')
        "#,
    )
    .bind(config_id)
    .execute(&pool)
    .await?;

    sqlx::query("DELETE FROM vendor_configurations WHERE id = $1")
        .bind(config_id)
        .execute(&pool)
        .await?;

    // Mappings and log entries follow the configuration out.
    let mappings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM field_mappings")
        .fetch_one(&pool)
        .await?;
    assert_eq!(mappings, 0);
    let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pos_ingestion_log")
        .fetch_one(&pool)
        .await?;
    assert_eq!(logs, 0);

    // Exceptions survive for forensics, detached from the configuration.
    let orphaned: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pos_ingest_exceptions WHERE vendor_configuration_id IS NULL",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(orphaned, 1);

    Ok(())
}
