//! Ingestion log routes
//!
//! Public read-only routes over the ingestion log. These endpoints do
//! NOT allow triggering or mutating ingestion runs.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::queries::{
    get_entry::handle as handle_get_entry, list_entries::handle as handle_list_entries,
    GetLogEntryError, GetLogEntryQuery, ListLogEntriesError, ListLogEntriesQuery,
    ListLogEntriesResponse, LogEntryDetails,
};

/// Create ingestion log routes
pub fn ingestion_log_routes() -> Router<PgPool> {
    Router::new()
        .route("/", get(list_entries))
        .route("/:entry_id", get(get_entry))
}

/// List ingestion log entries
///
/// GET /ingestion-log?vendor=simphony&status=failed&limit=50&offset=0
async fn list_entries(
    State(db): State<PgPool>,
    Query(query): Query<ListLogEntriesQuery>,
) -> AppResult<Json<ListLogEntriesResponse>> {
    match handle_list_entries(db, query).await {
        Ok(response) => Ok(Json(response)),
        Err(ListLogEntriesError::Database(e)) => Err(AppError::Database(e)),
    }
}

/// Get one ingestion log entry with its exceptions
///
/// GET /ingestion-log/:entry_id
async fn get_entry(
    State(db): State<PgPool>,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<LogEntryDetails>> {
    let query = GetLogEntryQuery { entry_id };

    match handle_get_entry(db, query).await {
        Ok(details) => Ok(Json(details)),
        Err(GetLogEntryError::NotFound(id)) => {
            Err(AppError::NotFound(format!("ingestion log entry {}", id)))
        }
        Err(GetLogEntryError::Database(e)) => Err(AppError::Database(e)),
    }
}
