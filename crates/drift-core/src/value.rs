//! Uniform value conversion rules for parameter binding
//!
//! Applied regardless of engine specifics: booleans bind as 0/1 integers,
//! out-of-range dates bind as NULL rather than erroring, and strings or
//! binaries above the fixed-size threshold are bound as TEXT/BLOB, the
//! engine's large-object types.

use chrono::Datelike;
use libsql::Value;

use crate::typemap::BindType;

/// Convert a cell value for binding under the column's binding type.
#[must_use]
pub fn convert_for_binding(value: Value, binding: BindType) -> Value {
    match (binding, value) {
        (BindType::Boolean, Value::Integer(i)) => Value::Integer(i64::from(i != 0)),
        (BindType::Boolean, Value::Text(t)) => {
            let truthy = matches!(t.trim().to_ascii_lowercase().as_str(), "1" | "true");
            Value::Integer(i64::from(truthy))
        }
        (BindType::DateTime | BindType::DateTimeOffset, Value::Text(t)) => {
            match chrono::DateTime::parse_from_rfc3339(&t) {
                Ok(parsed) if !(1..=9999).contains(&parsed.year()) => Value::Null,
                _ => Value::Text(t),
            }
        }
        (_, v) => v,
    }
}

/// Read an optional string out of a cell value.
#[must_use]
pub fn opt_string(value: Value) -> Option<String> {
    match value {
        Value::Text(t) => Some(t),
        _ => None,
    }
}

/// Read an optional integer out of a cell value.
#[must_use]
pub fn opt_i64(value: Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(i),
        _ => None,
    }
}
