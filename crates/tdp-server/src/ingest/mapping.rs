//! Dynamic field mapping engine
//!
//! Applies a vendor's `field_mappings` rows to each raw record, producing
//! [`MappedRecord`]s with canonical field names. The engine is built once
//! per cycle from the vendor's mapping rows.
//!
//! Row scoping: mappings with a `row_root` resolve inside each element the
//! root points at, producing one record per element. Mappings of the same
//! kind without a `row_root` resolve against the parent record and their
//! values are copied into every row, which is how line items inherit the
//! invoice number from their enclosing transaction.
//!
//! A compound source path (`saleDate|saleTime`) resolves both parts and
//! joins them into one timestamp string when the pair matches a known
//! shape, compact digits or ISO. Any other pairing fails resolution for
//! that field alone.

use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use super::config::FieldMapping;
use super::models::{MappedRecord, RawRecord, RecordKind};
use super::path::{self, Resolution};
use super::transform;

/// Errors raised while building an engine from mapping rows.
/// These indicate broken configuration, not bad vendor data.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid record kind '{0}' in field mappings")]
    InvalidRecordKind(String),

    #[error("Conflicting row roots for {kind} mappings: '{left}' vs '{right}'")]
    ConflictingRowRoots {
        kind: RecordKind,
        left: String,
        right: String,
    },
}

/// A record that could not be mapped. The raw source rides along so it can
/// be stored with the exception.
#[derive(Debug, Clone)]
pub struct MappingFailure {
    pub kind: RecordKind,
    pub message: String,
    pub source: Value,
}

struct KindMappings {
    row_root: Option<String>,
    /// Resolved against the parent record, copied into every row
    parent_scoped: Vec<FieldMapping>,
    /// Resolved against each row element
    row_scoped: Vec<FieldMapping>,
}

pub struct MappingEngine {
    timezone: chrono_tz::Tz,
    kinds: BTreeMap<&'static str, (RecordKind, KindMappings)>,
}

impl MappingEngine {
    pub fn new(timezone: &str, mappings: Vec<FieldMapping>) -> Result<Self, MappingError> {
        let tz = timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| MappingError::InvalidTimezone(timezone.to_string()))?;

        let mut kinds: BTreeMap<&'static str, (RecordKind, KindMappings)> = BTreeMap::new();

        for mapping in mappings {
            let kind: RecordKind = mapping
                .record_kind
                .parse()
                .map_err(|_| MappingError::InvalidRecordKind(mapping.record_kind.clone()))?;

            let entry = kinds.entry(kind.as_str()).or_insert_with(|| {
                (
                    kind,
                    KindMappings {
                        row_root: None,
                        parent_scoped: Vec::new(),
                        row_scoped: Vec::new(),
                    },
                )
            });

            match &mapping.row_root {
                Some(root) => {
                    match &entry.1.row_root {
                        Some(existing) if existing != root => {
                            return Err(MappingError::ConflictingRowRoots {
                                kind,
                                left: existing.clone(),
                                right: root.clone(),
                            });
                        }
                        _ => entry.1.row_root = Some(root.clone()),
                    }
                    entry.1.row_scoped.push(mapping);
                }
                None => entry.1.parent_scoped.push(mapping),
            }
        }

        Ok(Self { timezone: tz, kinds })
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.timezone
    }

    /// Map one raw vendor record into typed records.
    ///
    /// Record kinds with no mappings configured produce nothing, and so
    /// does a kind whose row root is absent from this record. A record
    /// kind whose fields cannot be satisfied produces a [`MappingFailure`]
    /// instead of a record; the rest of the output is unaffected.
    pub fn map_record(&self, raw: &RawRecord) -> (Vec<MappedRecord>, Vec<MappingFailure>) {
        let mut records = Vec::new();
        let mut failures = Vec::new();

        for (kind, km) in self.kinds.values() {
            let rows: Vec<Value> = match &km.row_root {
                None => vec![raw.clone()],
                Some(root) => rows_at(raw, root),
            };
            if rows.is_empty() {
                continue;
            }

            // Fields shared by every row of this kind.
            let parent_fields = match resolve_fields(&km.parent_scoped, raw, self.timezone) {
                Ok(fields) => fields,
                Err(message) => {
                    failures.push(MappingFailure {
                        kind: *kind,
                        message,
                        source: raw.clone(),
                    });
                    continue;
                }
            };

            for row in rows {
                let mut fields = parent_fields.clone();
                match resolve_fields(&km.row_scoped, &row, self.timezone) {
                    Ok(row_fields) => fields.extend(row_fields),
                    Err(message) => {
                        failures.push(MappingFailure {
                            kind: *kind,
                            message,
                            source: row,
                        });
                        continue;
                    }
                }

                if fields.is_empty() {
                    continue;
                }

                records.push(MappedRecord {
                    kind: *kind,
                    fields,
                    source: raw.clone(),
                });
            }
        }

        (records, failures)
    }
}

/// Elements a row root points at. A root resolving to an array yields one
/// row per element; a single object is one row; nothing, or a null, is
/// zero rows.
fn rows_at(raw: &Value, root: &str) -> Vec<Value> {
    let rows = match path::resolve(raw, root) {
        Resolution::Absent => Vec::new(),
        Resolution::One(Value::Array(items)) => items,
        Resolution::One(v) => vec![v],
        Resolution::Many(items) => items,
    };
    rows.into_iter().filter(|v| !v.is_null()).collect()
}

/// Resolve every mapping in the list against one context value.
/// The first unsatisfied required field fails the whole row.
fn resolve_fields(
    mappings: &[FieldMapping],
    context: &Value,
    tz: chrono_tz::Tz,
) -> Result<Map<String, Value>, String> {
    let mut fields = Map::new();

    for mapping in mappings {
        let resolved = resolve_source(context, &mapping.source_path);

        let value = match resolved {
            Some(v) => Some(v),
            None => mapping
                .default_value
                .as_ref()
                .map(|d| Value::String(d.clone())),
        };

        let Some(value) = value else {
            if mapping.is_required {
                return Err(format!(
                    "Required field '{}' not found at '{}'",
                    mapping.target_field, mapping.source_path
                ));
            }
            continue;
        };

        let value = match &mapping.transform_rule {
            Some(rule) => transform::apply(rule, &value, tz),
            None => value,
        };

        fields.insert(mapping.target_field.clone(), value);
    }

    Ok(fields)
}

/// Resolve a source path, handling the compound `date|time` form.
/// Explicit nulls read as absent here, so defaults still apply.
fn resolve_source(context: &Value, source_path: &str) -> Option<Value> {
    if let Some((date_path, time_path)) = source_path.split_once('|') {
        let date = first_scalar(path::resolve(context, date_path.trim()))?;
        let time = first_scalar(path::resolve(context, time_path.trim()))?;
        return combine_date_time(&date, &time).map(Value::String);
    }

    match path::resolve(context, source_path) {
        Resolution::Absent => None,
        Resolution::One(v) if v.is_null() => None,
        Resolution::One(v) => Some(v),
        // A scalar mapping hitting a fan-out takes the first usable match.
        Resolution::Many(vs) => vs.into_iter().find(|v| !v.is_null()),
    }
}

fn first_scalar(resolution: Resolution) -> Option<String> {
    resolution
        .into_values()
        .into_iter()
        .find_map(|v| scalar_string(&v))
}

/// Join a compound `date|time` pair into one parseable timestamp string.
/// Accepted shapes: compact digits (`YYYYMMDD` + `HHMMSS`) and ISO
/// (`YYYY-MM-DD` + `HH:MM:SS` with an optional fraction). Anything else
/// is a resolution failure for this field only.
fn combine_date_time(date: &str, time: &str) -> Option<String> {
    let compact = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());

    let digit_pair = compact(date, 8) && compact(time, 6);
    let iso_pair = NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
        && NaiveTime::parse_from_str(time, "%H:%M:%S%.f").is_ok();

    if digit_pair || iso_pair {
        Some(format!("{date} {time}"))
    } else {
        warn!(%date, %time, "Compound date|time pair has an unrecognized shape");
        None
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
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
