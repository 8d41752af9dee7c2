//! Shared value-coercion utilities for portal responses.
//!
//! Portal field values arrive as strings, numbers, or epoch timestamps
//! depending on the platform; these helpers coerce them into the canonical
//! forms. Malformed values become `None`, never errors.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Coerces a JSON value into a non-empty string. Numbers are rendered,
/// everything else is `None`.
#[must_use]
pub fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Coerces a JSON value into an f64. String values are parsed; malformed
/// numbers become `None`.
#[must_use]
pub fn value_to_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Coerces a JSON value into an i64. String values are parsed.
#[must_use]
pub fn value_to_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Converts epoch milliseconds to a `YYYY-MM-DD` date in UTC.
#[must_use]
pub fn epoch_ms_to_date(ms: i64) -> Option<String> {
    let dt = DateTime::from_timestamp_millis(ms)?;
    Some(dt.format("%Y-%m-%d").to_string())
}

/// Normalizes a portal date value to `YYYY-MM-DD`.
///
/// Accepts ISO 8601 datetimes (with optional fractional seconds), bare
/// dates, `MM/DD/YYYY` text dates, and numeric epoch milliseconds.
#[must_use]
pub fn value_to_date(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => epoch_ms_to_date(n.as_i64()?),
        serde_json::Value::String(s) => parse_date_str(s.trim()),
        _ => None,
    }
}

/// Parses a date string in any of the shapes portals actually send.
#[must_use]
pub fn parse_date_str(s: &str) -> Option<String> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.format("%Y-%m-%d").to_string());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.format("%Y-%m-%d").to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    None
}

/// Tries each candidate field name in order against an object, returning the
/// portal field that matched and its coerced string value.
#[must_use]
pub fn probe_string<'a>(
    record: &serde_json::Value,
    candidates: &[&'a str],
) -> Option<(&'a str, String)> {
    for field in candidates {
        if let Some(value) = record.get(*field)
            && let Some(s) = value_to_string(value)
        {
            return Some((field, s));
        }
    }
    None
}

/// Like [`probe_string`] but coerces to f64.
#[must_use]
pub fn probe_f64<'a>(
    record: &serde_json::Value,
    candidates: &[&'a str],
) -> Option<(&'a str, f64)> {
    for field in candidates {
        if let Some(value) = record.get(*field)
            && let Some(n) = value_to_f64(value)
        {
            return Some((field, n));
        }
    }
    None
}

/// Like [`probe_string`] but normalizes the value to a `YYYY-MM-DD` date.
#[must_use]
pub fn probe_date<'a>(
    record: &serde_json::Value,
    candidates: &[&'a str],
) -> Option<(&'a str, String)> {
    for field in candidates {
        if let Some(value) = record.get(*field)
            && let Some(date) = value_to_date(value)
        {
            return Some((field, date));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_numeric_strings() {
        assert_eq!(
            value_to_f64(&serde_json::json!("38.5816")),
            Some(38.581_6_f64)
        );
        assert_eq!(value_to_f64(&serde_json::json!(42)), Some(42.0));
        assert_eq!(value_to_f64(&serde_json::json!("not a number")), None);
    }

    #[test]
    fn renders_numbers_as_strings() {
        assert_eq!(
            value_to_string(&serde_json::json!(12345)),
            Some("12345".to_string())
        );
        assert_eq!(value_to_string(&serde_json::json!("  ")), None);
    }

    #[test]
    fn converts_epoch_ms_to_utc_date() {
        // 2024-01-15T14:30:00Z
        assert_eq!(
            epoch_ms_to_date(1_705_329_000_000),
            Some("2024-01-15".to_string())
        );
    }

    #[test]
    fn normalizes_date_shapes() {
        assert_eq!(
            parse_date_str("2024-10-15T00:00:00.000"),
            Some("2024-10-15".to_string())
        );
        assert_eq!(parse_date_str("2024-10-15"), Some("2024-10-15".to_string()));
        assert_eq!(parse_date_str("10/15/2024"), Some("2024-10-15".to_string()));
        assert_eq!(parse_date_str("not-a-date"), None);
    }

    #[test]
    fn probe_takes_first_present_candidate() {
        let record = serde_json::json!({"permittype": "Re-Roof", "type": "ignored"});
        let (field, value) = probe_string(&record, &["permit_type", "permittype", "type"]).unwrap();
        assert_eq!(field, "permittype");
        assert_eq!(value, "Re-Roof");
    }

    #[test]
    fn probe_skips_empty_values() {
        let record = serde_json::json!({"permit_type": "", "type": "ROOF"});
        let (field, value) = probe_string(&record, &["permit_type", "type"]).unwrap();
        assert_eq!(field, "type");
        assert_eq!(value, "ROOF");
    }
}
