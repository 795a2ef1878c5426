//! Value transformation rules
//!
//! Field mappings may name a transform rule to apply after path resolution.
//! Rule names are normalized before lookup (lowercased, `_` and `-`
//! stripped), so `toDateTime`, `to_date_time` and `todatetime` all select
//! the same rule.
//!
//! Applying a rule never fails: a value the rule cannot digest is logged
//! and passed through unchanged, and an unknown rule name is a no-op, so
//! stored configuration can carry rule names ahead of the code.
//!
//! Datetime rules accept the layouts vendors actually send (compact
//! `YYYYMMDD HHMMSS`, ISO variants with optional fractions, `DD/MM/YYYY`
//! with or without an AM/PM clock, epoch seconds or milliseconds) and emit
//! the canonical `YYYY-MM-DD HH:MM:SS` form the assembly stage expects.
//! Epoch and offset-carrying inputs name an instant; they are rendered in
//! the vendor's configured zone so the assembly stage, which reads naive
//! datetimes as vendor-local, lands on the same instant.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use sqlx::types::BigDecimal;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
enum TransformError {
    #[error("Unknown transform rule: {0}")]
    UnknownRule(String),

    #[error("Rule '{rule}' cannot be applied to '{value}'")]
    Invalid { rule: String, value: String },
}

fn normalize_rule_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_lowercase()
}

/// Apply a named transform rule to a resolved value.
///
/// Total: on any failure the original value comes back and a diagnostic is
/// logged. `tz` is the vendor's local zone, used when an input pins its own
/// instant (epoch, explicit offset).
pub fn apply(rule: &str, value: &Value, tz: Tz) -> Value {
    match try_apply(rule, value, tz) {
        Ok(v) => v,
        Err(TransformError::UnknownRule(name)) => {
            debug!(rule = %name, "Unknown transform rule, passing value through");
            value.clone()
        }
        Err(e) => {
            warn!(error = %e, "Transform failed, keeping raw value");
            value.clone()
        }
    }
}

fn try_apply(rule: &str, value: &Value, tz: Tz) -> Result<Value, TransformError> {
    let invalid = || TransformError::Invalid {
        rule: rule.to_string(),
        value: value.to_string(),
    };

    match normalize_rule_name(rule).as_str() {
        "trim" => Ok(match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other.clone(),
        }),
        "uppercase" | "upper" => Ok(match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other.clone(),
        }),
        "lowercase" | "lower" => Ok(match value {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other.clone(),
        }),
        "tonumber" | "number" | "numeric" => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => parse_number(s).ok_or_else(invalid),
            _ => Err(invalid()),
        },
        "todatetime" | "datetime" | "parsedatetime" | "normalizedatetime" => {
            parse_datetime_value(value, tz)
                .map(|dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .ok_or_else(invalid)
        }
        "toiso8601" | "iso8601" | "isoformat" => parse_datetime_value(value, tz)
            .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()))
            .ok_or_else(invalid),
        "todate" | "date" | "parsedate" => parse_date_value(value, tz)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(invalid),
        "totime" | "time" | "parsetime" => match value {
            Value::String(s) => parse_time_str(s)
                .map(|t| Value::String(t.format("%H:%M:%S").to_string()))
                .ok_or_else(invalid),
            _ => Err(invalid()),
        },
        _ => Err(TransformError::UnknownRule(rule.to_string())),
    }
}

/// Strip currency symbols, grouping separators and whitespace, keeping the
/// characters a number can be built from.
fn clean_numeric(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
        .collect()
}

fn parse_number(s: &str) -> Option<Value> {
    let cleaned = clean_numeric(s);
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(i) = cleaned.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Decimal view of a scalar value, for monetary amounts and quantities.
/// Strings are cleaned of currency noise first so `"$1,234.50"` parses.
pub(crate) fn to_bigdecimal(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => {
            let cleaned = clean_numeric(s);
            if cleaned.is_empty() {
                None
            } else {
                BigDecimal::from_str(&cleaned).ok()
            }
        }
        _ => None,
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y%m%d %H%M%S",
    "%Y%m%d%H%M%S",
    "%d/%m/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%d/%m/%Y", "%d-%m-%Y"];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H%M%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

/// Vendor-local wall clock for any datetime-ish value. Naive strings are
/// taken at face value; epochs and offset-carrying strings are instants
/// and get converted into `tz` first.
fn parse_datetime_value(value: &Value, tz: Tz) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&tz).naive_local());
            }
            parse_datetime_str(s)
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(epoch_instant)
            .map(|dt| dt.with_timezone(&tz).naive_local()),
        _ => None,
    }
}

fn parse_date_value(value: &Value, tz: Tz) -> Option<NaiveDate> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            parse_date_str(s).or_else(|| parse_datetime_value(value, tz).map(|dt| dt.date()))
        }
        Value::Number(_) => parse_datetime_value(value, tz).map(|dt| dt.date()),
        _ => None,
    }
}

/// Naive datetime layouts only. Offset handling belongs to the caller,
/// which knows whether a naive result reads as vendor-local or not.
pub(crate) fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    // Date-only inputs roll to midnight.
    parse_date_str(s).and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return Some(d);
        }
    }
    None
}

fn parse_time_str(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    for format in TIME_FORMATS {
        if let Ok(t) = NaiveTime::parse_from_str(s, format) {
            return Some(t);
        }
    }
    None
}

fn epoch_instant(raw: i64) -> Option<DateTime<Utc>> {
    // Values this large are epoch milliseconds.
    let (secs, millis) = if raw.abs() >= 100_000_000_000 {
        (raw.div_euclid(1000), raw.rem_euclid(1000) as u32)
    } else {
        (raw, 0)
    };
    DateTime::from_timestamp(secs, millis * 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TZ: Tz = chrono_tz::UTC;

    #[test]
    fn test_rule_name_synonyms() {
        let value = json!("20251210 143005");
        let expected = json!("2025-12-10 14:30:05");

        assert_eq!(apply("toDateTime", &value, TZ), expected);
        assert_eq!(apply("to_date_time", &value, TZ), expected);
        assert_eq!(apply("parse-datetime", &value, TZ), expected);
        assert_eq!(apply("DATETIME", &value, TZ), expected);
    }

    #[test]
    fn test_unknown_rule_is_a_noop() {
        assert_eq!(apply("reticulate", &json!("x"), TZ), json!("x"));
        assert_eq!(apply("reticulate", &json!(42), TZ), json!(42));
    }

    #[test]
    fn test_failed_rule_keeps_raw_value() {
        assert_eq!(apply("datetime", &json!("not a date"), TZ), json!("not a date"));
        assert_eq!(apply("datetime", &json!(true), TZ), json!(true));
        assert_eq!(apply("toNumber", &json!("n/a"), TZ), json!("n/a"));
    }

    #[test]
    fn test_datetime_layouts() {
        let cases = [
            ("2025-12-10 14:30:05", "2025-12-10 14:30:05"),
            ("2025-12-10T14:30:05", "2025-12-10 14:30:05"),
            ("2025-12-10 14:30:05.123456", "2025-12-10 14:30:05"),
            ("20251210143005", "2025-12-10 14:30:05"),
            ("10/12/2025 14:30:05", "2025-12-10 14:30:05"),
            ("10/12/2025 02:30:05 PM", "2025-12-10 14:30:05"),
            ("2025-12-10", "2025-12-10 00:00:00"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                apply("datetime", &json!(input), TZ),
                json!(expected),
                "input: {}",
                input
            );
        }
    }

    #[test]
    fn test_offset_input_renders_in_vendor_zone() {
        let value = json!("2025-12-10T14:30:05+04:00");
        assert_eq!(apply("datetime", &value, chrono_tz::UTC), json!("2025-12-10 10:30:05"));
        assert_eq!(
            apply("datetime", &value, chrono_tz::Asia::Dubai),
            json!("2025-12-10 14:30:05")
        );
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        // 2025-12-10T14:30:05Z
        assert_eq!(
            apply("datetime", &json!(1765377005_i64), TZ),
            json!("2025-12-10 14:30:05")
        );
        assert_eq!(
            apply("datetime", &json!(1765377005000_i64), TZ),
            json!("2025-12-10 14:30:05")
        );
        assert_eq!(
            apply("datetime", &json!(1765377005_i64), chrono_tz::Asia::Dubai),
            json!("2025-12-10 18:30:05")
        );
    }

    #[test]
    fn test_epoch_to_date_uses_vendor_zone() {
        // 2025-12-09T23:59:59Z, already the 10th in Dubai
        let value = json!(1765324799_i64);
        assert_eq!(apply("date", &value, chrono_tz::UTC), json!("2025-12-09"));
        assert_eq!(apply("date", &value, chrono_tz::Asia::Dubai), json!("2025-12-10"));
    }

    #[test]
    fn test_date_and_time_rules() {
        assert_eq!(apply("date", &json!("10/12/2025"), TZ), json!("2025-12-10"));
        assert_eq!(apply("date", &json!("20251210"), TZ), json!("2025-12-10"));
        assert_eq!(apply("date", &json!("2025-12-10 14:30:05"), TZ), json!("2025-12-10"));
        assert_eq!(apply("time", &json!("143005"), TZ), json!("14:30:05"));
        assert_eq!(apply("time", &json!("14:30"), TZ), json!("14:30:00"));
    }

    #[test]
    fn test_iso8601_rule() {
        assert_eq!(
            apply("toIso8601", &json!("20251210 143005"), TZ),
            json!("2025-12-10T14:30:05")
        );
        assert_eq!(
            apply("iso8601", &json!(1765377005_i64), TZ),
            json!("2025-12-10T14:30:05")
        );
    }

    #[test]
    fn test_number_rule_strips_currency() {
        assert_eq!(apply("toNumber", &json!("$1,234.50"), TZ), json!(1234.5));
        assert_eq!(apply("toNumber", &json!("42"), TZ), json!(42));
        assert_eq!(apply("toNumber", &json!(7.25), TZ), json!(7.25));
    }

    #[test]
    fn test_string_rules() {
        assert_eq!(apply("trim", &json!("  x  "), TZ), json!("x"));
        assert_eq!(apply("upper-case", &json!("inv-1"), TZ), json!("INV-1"));
        assert_eq!(apply("lowercase", &json!("CASH"), TZ), json!("cash"));
    }

    #[test]
    fn test_to_bigdecimal() {
        assert_eq!(
            to_bigdecimal(&json!("$1,250.75")),
            BigDecimal::from_str("1250.75").ok()
        );
        assert_eq!(to_bigdecimal(&json!(3)), BigDecimal::from_str("3").ok());
        assert_eq!(to_bigdecimal(&json!("")), None);
        assert_eq!(to_bigdecimal(&json!([1])), None);
    }
}
