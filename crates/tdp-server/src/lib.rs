//! TDP Server Library
#![recursion_limit = "256"]
//!
//! HTTP server and ingestion pipeline for point-of-sale transaction data.
//!
//! # Overview
//!
//! The TDP server continuously pulls sales transactions from configured
//! vendor endpoints and exposes a small read-only API over the results:
//!
//! - **Ingestion Pipeline**: fetch, map, correlate and insert on a schedule
//! - **Vendor Configurations**: connection details and field mappings live
//!   in the database, so onboarding a vendor is a data change
//! - **API Endpoints**: ingestion history and per-record failure inspection
//! - **Database Management**: PostgreSQL integration with SQLx
//!
//! # Architecture
//!
//! Read endpoints follow a query-per-file slice layout under `features`,
//! with each query implementing the mediator pattern. The write side has
//! no HTTP surface at all; transactions only enter the system through the
//! `ingest` pipeline, which runs from a scheduler task or the job queue.
//!
//! ## Framework Stack
//!
//! - **Axum**: Modern, ergonomic web framework
//! - **SQLx**: PostgreSQL driver and migrations
//! - **Tower**: Middleware and service abstractions
//! - **Apalis**: PostgreSQL-backed job queue for on-demand syncs

pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;

// Re-export commonly used types
pub use error::{AppError, AppResult};
