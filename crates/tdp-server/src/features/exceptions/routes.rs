//! Ingest exception routes
//!
//! Public read-only routes over per-record ingestion failures.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};

use super::queries::{
    list_exceptions::handle as handle_list_exceptions, ListExceptionsError, ListExceptionsQuery,
    ListExceptionsResponse,
};

/// Create exception routes
pub fn exceptions_routes() -> Router<PgPool> {
    Router::new().route("/", get(list_exceptions))
}

/// List ingest exceptions
///
/// GET /exceptions?stage=insert&invoice_no=INV-100&limit=50&offset=0
async fn list_exceptions(
    State(db): State<PgPool>,
    Query(query): Query<ListExceptionsQuery>,
) -> AppResult<Json<ListExceptionsResponse>> {
    match handle_list_exceptions(db, query).await {
        Ok(response) => Ok(Json(response)),
        Err(ListExceptionsError::Database(e)) => Err(AppError::Database(e)),
    }
}
