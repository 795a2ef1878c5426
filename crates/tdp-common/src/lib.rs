//! TDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the TDP project.
//!
//! # Overview
//!
//! This crate provides common functionality used across all TDP workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Tracing subscriber setup driven by environment configuration
//! - **Fingerprints**: Payload integrity fingerprints for fetched vendor data
//!
//! # Example
//!
//! ```no_run
//! use tdp_common::Result;
//! use tdp_common::fingerprint::payload_fingerprint;
//!
//! fn record_payload(body: &[u8]) -> Result<()> {
//!     let fingerprint = payload_fingerprint(body);
//!     println!("Payload fingerprint: {}", fingerprint);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, TdpError};
