//! Payload fingerprints for fetched vendor data
//!
//! Every fetched payload is fingerprinted with SHA-256 before it enters the
//! pipeline. The fingerprint is stored on the ingestion log entry so a payload
//! can be matched to the cycle that ingested it.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;

/// Compute the SHA-256 fingerprint of a raw payload
pub fn payload_fingerprint(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Compute the fingerprint of a JSON value
///
/// The value is serialized with `serde_json` before hashing, so two payloads
/// that parse to the same tree produce the same fingerprint regardless of
/// upstream whitespace.
pub fn json_fingerprint(value: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(payload_fingerprint(&bytes))
}

/// Compute the fingerprint of any readable source
pub fn fingerprint_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
