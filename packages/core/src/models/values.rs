//! Runtime Value Helpers
//!
//! Entities travel through the pipeline as `serde_json::Value` documents. These
//! helpers give the comparison semantics the compiler and the in-memory backend
//! share:
//!
//! - **Numeric equality**: `1` and `1.0` are equal
//! - **Ordering**: only defined between values of the same family
//! - **Canonical keys**: stable string form of a key value, used for map lookups
//! - **Text rendering**: strings render without quotes, everything else as JSON

use serde_json::Value;
use std::cmp::Ordering;

/// Compare two values for equality, treating integers and floats numerically
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => left == right,
    }
}

/// Order two values of the same family
///
/// Returns `None` when either side is null or the values are not mutually
/// comparable (e.g. a string against a number).
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total ordering used for sorting: nulls first, then by family, then by value
pub fn sort_order(left: &Value, right: &Value) -> Ordering {
    compare_values(left, right).unwrap_or_else(|| family_rank(left).cmp(&family_rank(right)))
}

fn family_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Stable string form of a key value
///
/// Integral floats collapse onto their integer form so `1` and `1.0` address
/// the same entity.
pub fn canonical_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                (f as i64).to_string()
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Render a value as text (strings unquoted)
pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `true` only for an explicit boolean `true`
pub fn is_true(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}
