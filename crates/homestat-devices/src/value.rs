//! Lenient number decoding for device JSON.
//!
//! Router firmwares send counters either as JSON numbers or as numeric
//! strings, sometimes both within one payload.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Read a counter from a number or a numeric string.
pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render an identifier that may be a number or a string.
pub(crate) fn as_label(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Serde adaptor for optional counters; unusable values become `None`.
pub(crate) fn flex_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(as_u64))
}
