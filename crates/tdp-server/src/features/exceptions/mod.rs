//! Ingest exceptions feature module
//!
//! Read-only access to records that failed during mapping, assembly or
//! insertion, with the raw payload that caused the failure.

pub mod queries;
pub mod routes;

pub use routes::exceptions_routes;
