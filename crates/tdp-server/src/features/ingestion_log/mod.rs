//! Ingestion log feature module
//!
//! Provides public read-only access to ingestion run history and the
//! exceptions recorded per run. NO triggers, NO mutation.

pub mod queries;
pub mod routes;


pub use routes::ingestion_log_routes;
