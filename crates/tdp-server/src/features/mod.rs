//! Feature modules implementing the TDP API
//!
//! Each feature is a vertical slice with its own queries and routes.
//! Queries implement the mediator pattern using the `mediator` crate,
//! keeping read handlers testable without HTTP plumbing.
//!
//! # Features
//!
//! - **ingestion_log**: ingestion run history per vendor configuration
//! - **exceptions**: per-record ingestion failures with raw payloads
//!
//! The whole API surface is read-only. Ingestion itself runs from the
//! scheduler, never from a route.

pub mod exceptions;
pub mod ingestion_log;

use axum::Router;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// PostgreSQL connection pool for database operations
    pub db: sqlx::PgPool,
}

/// Creates the main API router with all feature routes mounted
///
/// - `/ingestion-log` - ingestion run history
/// - `/exceptions` - per-record failures
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .nest(
            "/ingestion-log",
            ingestion_log::ingestion_log_routes().with_state(state.db.clone()),
        )
        .nest(
            "/exceptions",
            exceptions::exceptions_routes().with_state(state.db.clone()),
        )
}
