//! End-to-end mapping pipeline tests
//!
//! Exercise the in-memory half of the pipeline: raw vendor payloads are
//! mapped through database-style field mappings, grouped by invoice and
//! assembled into canonical transactions. No network or database needed.

use serde_json::json;
use sqlx::types::BigDecimal;
use std::str::FromStr;
use uuid::Uuid;

use tdp_server::ingest::config::{FieldMapping, VendorConfiguration};
use tdp_server::ingest::correlate::{assemble_transaction, group_records};
use tdp_server::ingest::mapping::MappingEngine;
use tdp_server::ingest::models::RecordKind;

fn vendor_config(timezone: &str) -> VendorConfiguration {
    VendorConfiguration {
        id: Uuid::new_v4(),
        vendor_name: "simphony".to_string(),
        brand_id: "BR-7".to_string(),
        outlet_id: "OUT-3".to_string(),
        terminal: None,
        gate: None,
        source_kind: "api".to_string(),
        endpoint_url: Some("https://pos.example.com/sales".to_string()),
        auth_token: None,
        username: None,
        password: None,
        soap_action: None,
        request_template: None,
        records_path: None,
        db_connection_string: None,
        db_query: None,
        page_size: None,
        timezone: timezone.to_string(),
        is_active: true,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

fn mapping(kind: &str, target: &str, source: &str) -> FieldMapping {
    FieldMapping {
        id: Uuid::new_v4(),
        vendor_configuration_id: Uuid::new_v4(),
        record_kind: kind.to_string(),
        target_field: target.to_string(),
        source_path: source.to_string(),
        transform_rule: None,
        row_root: None,
        default_value: None,
        is_required: false,
        sort_order: 0,
    }
}

fn required(kind: &str, target: &str, source: &str) -> FieldMapping {
    let mut m = mapping(kind, target, source);
    m.is_required = true;
    m
}

fn row_mapping(kind: &str, target: &str, source: &str, root: &str) -> FieldMapping {
    let mut m = mapping(kind, target, source);
    m.row_root = Some(root.to_string());
    m
}

/// Mapping rows for a nested JSON vendor: header fields at the top level,
/// items under `lineItems`, payments under `tenders`.
fn nested_vendor_mappings() -> Vec<FieldMapping> {
    vec![
        required("header", "invoice_no", "invoiceNumber"),
        required("header", "transaction_at", "businessDate|saleTime"),
        mapping("header", "gross_amount", "totals.gross"),
        mapping("header", "tax_amount", "totals.tax"),
        mapping("header", "net_amount", "totals.net"),
        mapping("header", "cover_count", "guests"),
        required("item", "invoice_no", "invoiceNumber"),
        row_mapping("item", "item_code", "sku", "lineItems"),
        row_mapping("item", "item_name", "name", "lineItems"),
        row_mapping("item", "quantity", "qty", "lineItems"),
        row_mapping("item", "unit_price", "price", "lineItems"),
        row_mapping("item", "line_total", "total", "lineItems"),
        required("payment", "invoice_no", "invoiceNumber"),
        row_mapping("payment", "method", "type", "tenders"),
        row_mapping("payment", "amount", "paid", "tenders"),
    ]
}

fn nested_vendor_payload() -> serde_json::Value {
    json!({
        "invoiceNumber": "INV-1001",
        "businessDate": "2025-12-10",
        "saleTime": "14:30:05",
        "guests": 4,
        "totals": {"gross": "120.00", "tax": "5.00", "net": "100.00"},
        "lineItems": [
            {"sku": "COFFEE", "name": "Coffee", "qty": 2, "price": "10.00", "total": "20.00"},
            {"sku": "CAKE", "name": "Cake", "qty": 1, "price": "80.00", "total": "80.00"}
        ],
        "tenders": [
            {"type": "CASH", "paid": "100.00"}
        ]
    })
}

#[test]
fn test_nested_payload_becomes_one_transaction() {
    let config = vendor_config("Asia/Dubai");
    let engine = MappingEngine::new(&config.timezone, nested_vendor_mappings()).unwrap();

    let (records, failures) = engine.map_record(&nested_vendor_payload());
    assert!(failures.is_empty(), "unexpected failures: {:?}", failures);
    // 1 header + 2 items + 1 payment
    assert_eq!(records.len(), 4);

    let (groups, orphans) = group_records(records);
    assert!(orphans.is_empty());
    assert_eq!(groups.len(), 1);

    let txn = assemble_transaction(groups.into_iter().next().unwrap(), engine.timezone(), &config)
        .unwrap();

    assert_eq!(txn.invoice_no, "INV-1001");
    assert_eq!(txn.brand_id, "BR-7");
    assert_eq!(txn.vendor_name, "simphony");
    // 14:30:05 in Dubai (UTC+4) is 10:30:05 UTC.
    assert_eq!(txn.transaction_at.to_rfc3339(), "2025-12-10T10:30:05+00:00");
    assert_eq!(txn.gross_amount, BigDecimal::from_str("120.00").ok());
    assert_eq!(txn.net_amount, BigDecimal::from_str("100.00").ok());
    assert_eq!(txn.cover_count, Some(4));

    assert_eq!(txn.lines.len(), 2);
    assert_eq!(txn.lines[0].item_code, "COFFEE");
    assert_eq!(txn.lines[0].item_name.as_deref(), Some("Coffee"));
    assert_eq!(txn.lines[0].quantity, BigDecimal::from(2));
    assert_eq!(txn.lines[1].item_code, "CAKE");

    assert_eq!(txn.payments.len(), 1);
    assert_eq!(txn.payments[0].method, "CASH");
    assert_eq!(txn.payments[0].amount, BigDecimal::from_str("100.00").unwrap());
}

#[test]
fn test_mapping_same_payload_twice_is_deterministic() {
    let config = vendor_config("Asia/Dubai");
    let engine = MappingEngine::new(&config.timezone, nested_vendor_mappings()).unwrap();

    let mut transactions = Vec::new();
    for _ in 0..2 {
        let (records, _) = engine.map_record(&nested_vendor_payload());
        let (groups, _) = group_records(records);
        let txn =
            assemble_transaction(groups.into_iter().next().unwrap(), engine.timezone(), &config)
                .unwrap();
        transactions.push(txn);
    }

    assert_eq!(transactions[0].natural_key(), transactions[1].natural_key());
    assert_eq!(transactions[0].transaction_at, transactions[1].transaction_at);
    assert_eq!(transactions[0].lines.len(), transactions[1].lines.len());
}

#[test]
fn test_record_missing_required_field_fails_alone() {
    let config = vendor_config("UTC");
    let engine = MappingEngine::new(&config.timezone, nested_vendor_mappings()).unwrap();

    let good = nested_vendor_payload();
    let bad = json!({
        "businessDate": "2025-12-10",
        "saleTime": "09:00:00",
        "totals": {"net": "10.00"}
    });

    let mut mapped = Vec::new();
    let mut failures = Vec::new();
    for raw in [&good, &bad] {
        let (records, errs) = engine.map_record(raw);
        mapped.extend(records);
        failures.extend(errs);
    }

    // The good record still produced its full set.
    assert_eq!(mapped.len(), 4);
    // Only the header mapping of the bad record failed; its item and
    // payment roots are absent so those kinds produce nothing.
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, RecordKind::Header);
    assert!(failures[0].message.contains("invoice_no"));
}

#[test]
fn test_flat_rows_group_under_shared_invoice() {
    // Flat exports repeat the invoice on every row; headers collapse and
    // items accumulate.
    let config = vendor_config("UTC");
    let mappings = vec![
        required("header", "invoice_no", "InvoiceNo"),
        required("header", "transaction_at", "SaleDate"),
        required("item", "invoice_no", "InvoiceNo"),
        mapping("item", "item_code", "ItemCode"),
        mapping("item", "quantity", "Qty"),
    ];
    let engine = MappingEngine::new(&config.timezone, mappings).unwrap();

    let rows = [
        json!({"InvoiceNo": "F-1", "SaleDate": "2025-03-01 12:00:00", "ItemCode": "A", "Qty": 1}),
        json!({"InvoiceNo": "F-1", "SaleDate": "2025-03-01 12:00:00", "ItemCode": "B", "Qty": 3}),
    ];

    let mut mapped = Vec::new();
    for row in &rows {
        let (records, failures) = engine.map_record(row);
        assert!(failures.is_empty());
        mapped.extend(records);
    }

    let (groups, orphans) = group_records(mapped);
    assert!(orphans.is_empty());
    assert_eq!(groups.len(), 1);

    let txn = assemble_transaction(groups.into_iter().next().unwrap(), engine.timezone(), &config)
        .unwrap();
    assert_eq!(txn.invoice_no, "F-1");
    assert_eq!(txn.lines.len(), 2);
    assert_eq!(txn.lines[1].quantity, BigDecimal::from(3));
}

#[test]
fn test_items_without_matching_header_are_orphaned() {
    let config = vendor_config("UTC");
    let mappings = vec![
        required("item", "invoice_no", "inv"),
        mapping("item", "item_code", "code"),
    ];
    let engine = MappingEngine::new(&config.timezone, mappings).unwrap();

    let (records, failures) = engine.map_record(&json!({"inv": "LONELY", "code": "X"}));
    assert!(failures.is_empty());

    let (groups, orphans) = group_records(records);
    assert!(groups.is_empty());
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].kind, RecordKind::Item);
}

#[test]
fn test_transform_rules_run_during_mapping() {
    let config = vendor_config("UTC");
    let mut price = mapping("header", "net_amount", "Amount");
    price.transform_rule = Some("to_number".to_string());
    let mappings = vec![
        required("header", "invoice_no", "Invoice"),
        required("header", "transaction_at", "When"),
        price,
    ];
    let engine = MappingEngine::new(&config.timezone, mappings).unwrap();

    let raw = json!({
        "Invoice": "T-9",
        "When": "2025-06-01 10:00:00",
        "Amount": "1,299.50"
    });
    let (records, failures) = engine.map_record(&raw);
    assert!(failures.is_empty());

    let (groups, _) = group_records(records);
    let txn = assemble_transaction(groups.into_iter().next().unwrap(), engine.timezone(), &config)
        .unwrap();

    assert_eq!(txn.net_amount, BigDecimal::from_str("1299.50").ok());
}

#[test]
fn test_default_value_fills_missing_source() {
    let config = vendor_config("UTC");
    let mut method = row_mapping("payment", "method", "kind", "pays");
    method.default_value = Some("CASH".to_string());
    let mappings = vec![
        required("header", "invoice_no", "inv"),
        required("header", "transaction_at", "at"),
        required("payment", "invoice_no", "inv"),
        method,
        row_mapping("payment", "amount", "amt", "pays"),
    ];
    let engine = MappingEngine::new(&config.timezone, mappings).unwrap();

    let raw = json!({
        "inv": "D-1",
        "at": "2025-06-01 10:00:00",
        "pays": [{"amt": "15.00"}]
    });
    let (records, failures) = engine.map_record(&raw);
    assert!(failures.is_empty());

    let (groups, _) = group_records(records);
    let txn = assemble_transaction(groups.into_iter().next().unwrap(), engine.timezone(), &config)
        .unwrap();
    assert_eq!(txn.payments[0].method, "CASH");
    assert_eq!(txn.payments[0].amount, BigDecimal::from_str("15.00").unwrap());
}

#[test]
fn test_assembly_failure_names_bad_datetime() {
    let config = vendor_config("UTC");
    let mappings = vec![
        required("header", "invoice_no", "inv"),
        required("header", "transaction_at", "at"),
    ];
    let engine = MappingEngine::new(&config.timezone, mappings).unwrap();

    let (records, _) = engine.map_record(&json!({"inv": "B-1", "at": "soon"}));
    let (groups, _) = group_records(records);
    let err = assemble_transaction(groups.into_iter().next().unwrap(), engine.timezone(), &config)
        .unwrap_err();

    assert!(err.to_string().contains("soon"));
}

#[test]
fn test_unknown_timezone_is_rejected_up_front() {
    let err = MappingEngine::new("Mars/Olympus", nested_vendor_mappings()).unwrap_err();
    assert!(err.to_string().contains("Mars/Olympus"));
}
