//! Canonical transaction models
//!
//! Vendor payloads are parsed into `serde_json::Value` trees regardless of
//! wire format, mapped into [`MappedRecord`]s by the mapping engine, and
//! assembled into [`PosTransaction`]s during correlation.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::BigDecimal;
use uuid::Uuid;

/// A raw vendor record, as fetched and parsed but not yet mapped
pub type RawRecord = Value;

/// The kind of record a field mapping produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Header,
    Item,
    Payment,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Header => "header",
            RecordKind::Item => "item",
            RecordKind::Payment => "payment",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "header" | "hdr" => Ok(RecordKind::Header),
            "item" | "line" | "detail" => Ok(RecordKind::Item),
            "payment" | "tender" => Ok(RecordKind::Payment),
            other => anyhow::bail!("Invalid record kind: {}", other),
        }
    }
}

/// One mapped record: canonical field names with values pulled from a raw
/// vendor record. `source` keeps the raw record for exception reporting.
#[derive(Debug, Clone)]
pub struct MappedRecord {
    pub kind: RecordKind,
    pub fields: Map<String, Value>,
    pub source: Value,
}

impl MappedRecord {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Scalar field as a trimmed string. Arrays and objects yield None.
    pub fn field_str(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// A single line item on a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionLine {
    pub item_code: String,
    pub item_name: Option<String>,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub line_total: BigDecimal,
}

/// A payment applied to a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPayment {
    pub method: String,
    pub amount: BigDecimal,
}

/// A fully assembled POS transaction, ready for insertion.
/// Lines and payments are owned by the header, so they share its
/// identity dimensions by construction.
#[derive(Debug, Clone)]
pub struct PosTransaction {
    pub invoice_no: String,
    pub brand_id: String,
    pub outlet_id: String,
    pub terminal: Option<String>,
    pub gate: Option<String>,
    pub vendor_name: String,
    pub transaction_at: DateTime<Utc>,
    pub gross_amount: Option<BigDecimal>,
    pub discount_amount: Option<BigDecimal>,
    pub tax_amount: Option<BigDecimal>,
    pub net_amount: Option<BigDecimal>,
    pub cover_count: Option<i32>,
    pub lines: Vec<TransactionLine>,
    pub payments: Vec<TransactionPayment>,
}

impl PosTransaction {
    /// The natural key that makes insertion idempotent
    pub fn natural_key(&self) -> String {
        format!("{}|{}|{}", self.invoice_no, self.brand_id, self.outlet_id)
    }
}

/// Outcome status of one ingestion window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStatus {
    /// Every fetched record was inserted or was a known duplicate
    Success,
    /// Some records landed, some failed
    Partial,
    /// Nothing usable came out of the window
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Success => "success",
            IngestionStatus::Partial => "partial",
            IngestionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IngestionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "success" => Ok(IngestionStatus::Success),
            "partial" => Ok(IngestionStatus::Partial),
            "failed" => Ok(IngestionStatus::Failed),
            other => anyhow::bail!("Invalid ingestion status: {}", other),
        }
    }
}

/// What started an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestTrigger {
    /// The periodic cycle scheduler
    Schedule,
    /// A queued vendor sync job
    Submitted,
}

impl IngestTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestTrigger::Schedule => "schedule",
            IngestTrigger::Submitted => "submitted",
        }
    }
}

impl std::fmt::Display for IngestTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ingestion log row to persist at the end of a cycle.
///
/// The id is generated up front so exception and transaction rows written
/// during the cycle can reference it.
#[derive(Debug, Clone)]
pub struct NewIngestionLog {
    pub id: Uuid,
    pub vendor_configuration_id: Uuid,
    pub vendor_name: String,
    pub brand_id: String,
    pub outlet_id: String,
    pub status: IngestionStatus,
    pub triggered_by: IngestTrigger,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub fetched_records: i32,
    pub inserted_count: i32,
    pub duplicate_count: i32,
    pub error_count: i32,
    pub payload_fingerprint: Option<String>,
    pub error_message: Option<String>,
    /// Free-form per-run detail, currently the mapping and correlation
    /// failure breakdown
    pub metadata: Option<Value>,
    pub started_at: DateTime<Utc>,
}
