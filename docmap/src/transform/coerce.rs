//! Best-effort per-type coercions.
//!
//! Each function returns the coerced value, or `None` when the input is not
//! structurally valid for the conversion. Callers leave such values as they
//! are: coercion never rejects.

use crate::document::{ObjectId, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Numbers stay as they are; strings that parse as a finite number become
/// numeric.
pub fn to_number(value: &Value) -> Option<Value> {
    match value {
        Value::Int(_) => Some(value.clone()),
        Value::Float(f) if f.is_finite() => Some(value.clone()),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Some(Value::Int(n));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float)
        }
        _ => None,
    }
}

/// Dates stay as they are; RFC 3339 timestamps, `YYYY-MM-DD HH:MM:SS`,
/// plain `YYYY-MM-DD` dates and epoch milliseconds become dates (UTC).
pub fn to_date(value: &Value) -> Option<Value> {
    match value {
        Value::Date(_) => Some(value.clone()),
        Value::Int(millis) => Utc.timestamp_millis_opt(*millis).single().map(Value::Date),
        Value::String(s) => parse_date(s.trim()).map(Value::Date),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// `"false"` and `"0"` are false; everything else is cast by truthiness.
pub fn to_boolean(value: &Value) -> Value {
    match value {
        Value::String(s) if s == "false" || s == "0" => Value::Bool(false),
        other => Value::Bool(truthy(other)),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0 && !f.is_nan(),
        Value::String(s) => !s.is_empty(),
        Value::Date(_) | Value::Id(_) | Value::Array(_) | Value::Object(_) => true,
    }
}

/// Identifier strings become the native identifier form.
pub fn to_reference(value: &Value) -> Option<Value> {
    match value {
        Value::Id(_) => Some(value.clone()),
        Value::String(s) => ObjectId::parse(s).map(Value::Id),
        _ => None,
    }
}
