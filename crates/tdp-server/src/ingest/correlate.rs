//! Correlation and transaction assembly
//!
//! Mapped records are grouped by invoice number, then each complete group
//! (one header plus its items and payments) is assembled into a
//! [`PosTransaction`]. Groups without a header are orphans and are
//! discarded. Vendor-local datetimes are converted to UTC here using the
//! configured timezone.
//!
//! Canonical field names consumed during assembly:
//! header: `invoice_no`, `brand_id`, `outlet_id`, `terminal`, `gate`,
//! `transaction_at`, `gross_amount`, `discount_amount`, `tax_amount`,
//! `net_amount`, `cover_count`; item: `item_code`, `item_name`,
//! `quantity`, `unit_price`, `line_total`; payment: `method`, `amount`.

use chrono::{DateTime, LocalResult, Utc};
use chrono_tz::Tz;
use sqlx::types::BigDecimal;
use std::collections::HashMap;
use thiserror::Error;

use super::config::VendorConfiguration;
use super::models::{
    MappedRecord, PosTransaction, RecordKind, TransactionLine, TransactionPayment,
};
use super::transform;

/// Records sharing one invoice number
#[derive(Debug)]
pub struct TransactionGroup {
    pub key: String,
    pub header: MappedRecord,
    pub items: Vec<MappedRecord>,
    pub payments: Vec<MappedRecord>,
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Header is missing field '{0}'")]
    MissingHeaderField(&'static str),

    #[error("Invalid transaction datetime '{0}'")]
    InvalidDateTime(String),

    #[error("Field '{0}' has a non-numeric value")]
    InvalidNumber(String),

    #[error("Item row is missing 'item_code'")]
    MissingItemCode,

    #[error("Payment row is missing field '{0}'")]
    MissingPaymentField(&'static str),
}

struct GroupBuilder {
    key: String,
    header: Option<MappedRecord>,
    items: Vec<MappedRecord>,
    payments: Vec<MappedRecord>,
}

/// Group mapped records by invoice number, preserving first-seen order.
///
/// Returns the complete groups and the orphaned records: anything without
/// an invoice number, and every record of a group that never saw a header.
/// Duplicate headers within a group are collapsed to the first, which is
/// what flat exports produce when every row repeats the header columns.
pub fn group_records(records: Vec<MappedRecord>) -> (Vec<TransactionGroup>, Vec<MappedRecord>) {
    let mut builders: Vec<GroupBuilder> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut orphans = Vec::new();

    for record in records {
        let Some(key) = record.field_str("invoice_no") else {
            orphans.push(record);
            continue;
        };

        let slot = *index.entry(key.clone()).or_insert_with(|| {
            builders.push(GroupBuilder {
                key,
                header: None,
                items: Vec::new(),
                payments: Vec::new(),
            });
            builders.len() - 1
        });
        let builder = &mut builders[slot];

        match record.kind {
            RecordKind::Header => {
                if builder.header.is_none() {
                    builder.header = Some(record);
                }
            }
            RecordKind::Item => builder.items.push(record),
            RecordKind::Payment => builder.payments.push(record),
        }
    }

    let mut groups = Vec::new();
    for builder in builders {
        match builder.header {
            Some(header) => groups.push(TransactionGroup {
                key: builder.key,
                header,
                items: builder.items,
                payments: builder.payments,
            }),
            None => {
                orphans.extend(builder.items);
                orphans.extend(builder.payments);
            }
        }
    }

    (groups, orphans)
}

/// Assemble one group into a canonical transaction.
///
/// Any malformed field fails the whole group; a transaction with silently
/// dropped lines would be worse than no transaction.
pub fn assemble_transaction(
    group: TransactionGroup,
    tz: Tz,
    config: &VendorConfiguration,
) -> Result<PosTransaction, AssemblyError> {
    let header = &group.header;

    let raw_datetime = header
        .field_str("transaction_at")
        .ok_or(AssemblyError::MissingHeaderField("transaction_at"))?;
    // A value with an explicit offset already pins its instant; naive
    // values read as vendor-local wall clock.
    let transaction_at = match DateTime::parse_from_rfc3339(&raw_datetime) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => {
            let naive = transform::parse_datetime_str(&raw_datetime)
                .ok_or_else(|| AssemblyError::InvalidDateTime(raw_datetime.clone()))?;
            match tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => dt,
                // DST fold: take the earlier instant.
                LocalResult::Ambiguous(earlier, _) => earlier,
                LocalResult::None => return Err(AssemblyError::InvalidDateTime(raw_datetime)),
            }
            .with_timezone(&Utc)
        }
    };

    let mut lines = Vec::with_capacity(group.items.len());
    for item in &group.items {
        lines.push(TransactionLine {
            item_code: item
                .field_str("item_code")
                .ok_or(AssemblyError::MissingItemCode)?,
            item_name: item.field_str("item_name"),
            quantity: decimal_or(item, "quantity", BigDecimal::from(1))?,
            unit_price: decimal_or(item, "unit_price", BigDecimal::from(0))?,
            line_total: decimal_or(item, "line_total", BigDecimal::from(0))?,
        });
    }

    let mut payments = Vec::with_capacity(group.payments.len());
    for payment in &group.payments {
        let amount = match payment.field("amount") {
            Some(v) => transform::to_bigdecimal(v)
                .ok_or_else(|| AssemblyError::InvalidNumber("amount".to_string()))?,
            None => return Err(AssemblyError::MissingPaymentField("amount")),
        };
        payments.push(TransactionPayment {
            method: payment
                .field_str("method")
                .ok_or(AssemblyError::MissingPaymentField("method"))?,
            amount,
        });
    }

    Ok(PosTransaction {
        invoice_no: group.key,
        brand_id: header
            .field_str("brand_id")
            .unwrap_or_else(|| config.brand_id.clone()),
        outlet_id: header
            .field_str("outlet_id")
            .unwrap_or_else(|| config.outlet_id.clone()),
        terminal: header
            .field_str("terminal")
            .or_else(|| config.terminal.clone()),
        gate: header.field_str("gate").or_else(|| config.gate.clone()),
        vendor_name: config.vendor_name.clone(),
        transaction_at,
        gross_amount: optional_decimal(header, "gross_amount")?,
        discount_amount: optional_decimal(header, "discount_amount")?,
        tax_amount: optional_decimal(header, "tax_amount")?,
        net_amount: optional_decimal(header, "net_amount")?,
        cover_count: optional_int(header, "cover_count")?,
        lines,
        payments,
    })
}

fn decimal_or(
    record: &MappedRecord,
    field: &str,
    default: BigDecimal,
) -> Result<BigDecimal, AssemblyError> {
    match record.field(field) {
        None => Ok(default),
        Some(v) => {
            transform::to_bigdecimal(v).ok_or_else(|| AssemblyError::InvalidNumber(field.to_string()))
        }
    }
}

fn optional_decimal(
    record: &MappedRecord,
    field: &str,
) -> Result<Option<BigDecimal>, AssemblyError> {
    match record.field(field) {
        None => Ok(None),
        Some(v) => transform::to_bigdecimal(v)
            .map(Some)
            .ok_or_else(|| AssemblyError::InvalidNumber(field.to_string())),
    }
}

fn optional_int(record: &MappedRecord, field: &str) -> Result<Option<i32>, AssemblyError> {
    match record.field(field) {
        None => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| AssemblyError::InvalidNumber(field.to_string())),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|_| AssemblyError::InvalidNumber(field.to_string())),
        Some(_) => Err(AssemblyError::InvalidNumber(field.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::{json, Map, Value};
    use std::str::FromStr;
    use uuid::Uuid;

    fn record(kind: RecordKind, fields: Value) -> MappedRecord {
        let map: Map<String, Value> = fields.as_object().cloned().unwrap_or_default();
        MappedRecord {
            kind,
            fields: map,
            source: Value::Null,
        }
    }

    fn config() -> VendorConfiguration {
        VendorConfiguration {
            id: Uuid::new_v4(),
            vendor_name: "acme-pos".to_string(),
            brand_id: "BR1".to_string(),
            outlet_id: "OUT1".to_string(),
            terminal: Some("T-01".to_string()),
            gate: None,
            source_kind: "api".to_string(),
            endpoint_url: Some("https://pos.example.com".to_string()),
            auth_token: None,
            username: None,
            password: None,
            soap_action: None,
            request_template: None,
            records_path: None,
            db_connection_string: None,
            db_query: None,
            page_size: None,
            timezone: "Asia/Dubai".to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_grouping_collects_items_and_payments() {
        let records = vec![
            record(RecordKind::Header, json!({"invoice_no": "A"})),
            record(RecordKind::Item, json!({"invoice_no": "A", "item_code": "X"})),
            record(RecordKind::Header, json!({"invoice_no": "B"})),
            record(RecordKind::Item, json!({"invoice_no": "B", "item_code": "Y"})),
            record(RecordKind::Item, json!({"invoice_no": "A", "item_code": "Z"})),
            record(RecordKind::Payment, json!({"invoice_no": "A", "method": "CASH", "amount": 5})),
        ];

        let (groups, orphans) = group_records(records);

        assert!(orphans.is_empty());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "A");
        assert_eq!(groups[0].items.len(), 2);
        assert_eq!(groups[0].payments.len(), 1);
        assert_eq!(groups[1].key, "B");
        assert_eq!(groups[1].items.len(), 1);
    }

    #[test]
    fn test_headerless_groups_are_orphaned() {
        let records = vec![
            record(RecordKind::Header, json!({"invoice_no": "A"})),
            record(RecordKind::Item, json!({"invoice_no": "GHOST", "item_code": "X"})),
            record(RecordKind::Payment, json!({"invoice_no": "GHOST", "method": "CARD", "amount": 1})),
        ];

        let (groups, orphans) = group_records(records);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "A");
        assert_eq!(orphans.len(), 2);
    }

    #[test]
    fn test_records_without_invoice_are_orphaned() {
        let records = vec![record(RecordKind::Item, json!({"item_code": "X"}))];
        let (groups, orphans) = group_records(records);
        assert!(groups.is_empty());
        assert_eq!(orphans.len(), 1);
    }

    #[test]
    fn test_duplicate_headers_collapse_to_first() {
        let records = vec![
            record(RecordKind::Header, json!({"invoice_no": "A", "net_amount": 10})),
            record(RecordKind::Header, json!({"invoice_no": "A", "net_amount": 99})),
        ];

        let (groups, orphans) = group_records(records);

        assert!(orphans.is_empty());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].header.fields["net_amount"], json!(10));
    }

    #[test]
    fn test_numeric_and_string_invoice_keys_match() {
        let records = vec![
            record(RecordKind::Header, json!({"invoice_no": 42})),
            record(RecordKind::Item, json!({"invoice_no": "42", "item_code": "X"})),
        ];

        let (groups, orphans) = group_records(records);

        assert!(orphans.is_empty());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].items.len(), 1);
    }

    #[test]
    fn test_assemble_converts_local_time_to_utc() {
        let group = TransactionGroup {
            key: "INV-1".to_string(),
            header: record(
                RecordKind::Header,
                json!({
                    "invoice_no": "INV-1",
                    "transaction_at": "2025-12-10 14:30:05",
                    "gross_amount": "120.00",
                    "net_amount": "100.00",
                    "cover_count": "4"
                }),
            ),
            items: vec![record(
                RecordKind::Item,
                json!({"item_code": "COFFEE", "quantity": 2, "unit_price": "10.00", "line_total": "20.00"}),
            )],
            payments: vec![record(
                RecordKind::Payment,
                json!({"method": "CASH", "amount": "100.00"}),
            )],
        };

        let txn = assemble_transaction(group, chrono_tz::Asia::Dubai, &config()).unwrap();

        // Dubai is UTC+4 year-round.
        let expected: DateTime<Utc> = "2025-12-10T10:30:05Z".parse().unwrap();
        assert_eq!(txn.transaction_at, expected);
        assert_eq!(txn.invoice_no, "INV-1");
        assert_eq!(txn.brand_id, "BR1");
        assert_eq!(txn.outlet_id, "OUT1");
        // Identity falls back to the configuration when the header has none.
        assert_eq!(txn.terminal.as_deref(), Some("T-01"));
        assert_eq!(txn.gate, None);
        assert_eq!(txn.gross_amount, BigDecimal::from_str("120.00").ok());
        assert_eq!(txn.cover_count, Some(4));
        assert_eq!(txn.lines.len(), 1);
        assert_eq!(txn.lines[0].quantity, BigDecimal::from(2));
        assert_eq!(txn.payments[0].method, "CASH");
    }

    #[test]
    fn test_header_terminal_wins_over_config() {
        let group = TransactionGroup {
            key: "INV-1".to_string(),
            header: record(
                RecordKind::Header,
                json!({
                    "invoice_no": "INV-1",
                    "transaction_at": "2025-01-05 09:00:00",
                    "terminal": "TILL-9",
                    "gate": "G2"
                }),
            ),
            items: vec![],
            payments: vec![],
        };

        let txn = assemble_transaction(group, chrono_tz::UTC, &config()).unwrap();
        assert_eq!(txn.terminal.as_deref(), Some("TILL-9"));
        assert_eq!(txn.gate.as_deref(), Some("G2"));
    }

    #[test]
    fn test_offset_datetime_keeps_its_instant() {
        // The configured zone applies to naive values only; an explicit
        // offset wins over it.
        let group = TransactionGroup {
            key: "INV-1".to_string(),
            header: record(
                RecordKind::Header,
                json!({
                    "invoice_no": "INV-1",
                    "transaction_at": "2025-12-10T14:30:05+04:00"
                }),
            ),
            items: vec![],
            payments: vec![],
        };

        let txn = assemble_transaction(group, chrono_tz::America::New_York, &config()).unwrap();
        let expected: DateTime<Utc> = "2025-12-10T10:30:05Z".parse().unwrap();
        assert_eq!(txn.transaction_at, expected);
    }

    #[test]
    fn test_assemble_rejects_bad_datetime() {
        let group = TransactionGroup {
            key: "INV-1".to_string(),
            header: record(
                RecordKind::Header,
                json!({"invoice_no": "INV-1", "transaction_at": "not-a-date"}),
            ),
            items: vec![],
            payments: vec![],
        };

        let err = assemble_transaction(group, chrono_tz::UTC, &config()).unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidDateTime(_)));
    }

    #[test]
    fn test_assemble_requires_transaction_datetime() {
        let group = TransactionGroup {
            key: "INV-1".to_string(),
            header: record(RecordKind::Header, json!({"invoice_no": "INV-1"})),
            items: vec![],
            payments: vec![],
        };

        let err = assemble_transaction(group, chrono_tz::UTC, &config()).unwrap_err();
        assert!(matches!(err, AssemblyError::MissingHeaderField("transaction_at")));
    }

    #[test]
    fn test_assemble_item_defaults() {
        let group = TransactionGroup {
            key: "INV-1".to_string(),
            header: record(
                RecordKind::Header,
                json!({"invoice_no": "INV-1", "transaction_at": "2025-01-05 09:00:00"}),
            ),
            items: vec![record(RecordKind::Item, json!({"item_code": "TEA"}))],
            payments: vec![],
        };

        let txn = assemble_transaction(group, chrono_tz::UTC, &config()).unwrap();
        assert_eq!(txn.lines[0].quantity, BigDecimal::from(1));
        assert_eq!(txn.lines[0].unit_price, BigDecimal::from(0));
    }

    #[test]
    fn test_assemble_rejects_garbage_amounts() {
        let group = TransactionGroup {
            key: "INV-1".to_string(),
            header: record(
                RecordKind::Header,
                json!({
                    "invoice_no": "INV-1",
                    "transaction_at": "2025-01-05 09:00:00",
                    "net_amount": "about ten"
                }),
            ),
            items: vec![],
            payments: vec![],
        };

        let err = assemble_transaction(group, chrono_tz::UTC, &config()).unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidNumber(_)));
    }

    #[test]
    fn test_assemble_rejects_payment_without_amount() {
        let group = TransactionGroup {
            key: "INV-1".to_string(),
            header: record(
                RecordKind::Header,
                json!({"invoice_no": "INV-1", "transaction_at": "2025-01-05 09:00:00"}),
            ),
            items: vec![],
            payments: vec![record(RecordKind::Payment, json!({"method": "CARD"}))],
        };

        let err = assemble_transaction(group, chrono_tz::UTC, &config()).unwrap_err();
        assert!(matches!(err, AssemblyError::MissingPaymentField("amount")));
    }
}
