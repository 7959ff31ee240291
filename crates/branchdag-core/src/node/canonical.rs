//! Canonical JSON serialization.
//!
//! Produces compact JSON with object keys sorted lexicographically at every
//! nesting level. Node signatures and content keys are both computed over
//! this form, so the same logical node must always produce the same bytes
//! no matter how its maps were built.
//!
//! Rules:
//! - Compact: no whitespace between tokens.
//! - Object keys sorted lexicographically (recursive at every depth).
//! - Arrays preserve element order.
//! - Numbers, strings, booleans, and null serialized normally.

use serde_json::Value;

/// Produce a canonical JSON string from a [`serde_json::Value`].
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use branchdag_core::node::canonical::canonicalize_json;
///
/// let val = json!({"z": 1, "a": {"c": 3, "b": 2}});
/// assert_eq!(canonicalize_json(&val).unwrap(), r#"{"a":{"b":2,"c":3},"z":1}"#);
/// ```
///
/// # Errors
///
/// Returns `serde_json::Error` if a string fails to escape (not expected
/// for values that came out of `serde_json`).
pub fn canonicalize_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut buf = String::new();
    write_canonical(value, &mut buf)?;
    Ok(buf)
}

/// Canonical JSON bytes for any serializable value.
///
/// # Errors
///
/// Returns `serde_json::Error` if `value` cannot be represented as JSON.
pub fn to_canonical_bytes<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(canonicalize_json(&value)?.into_bytes())
}

fn write_canonical(value: &Value, buf: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => buf.push_str(&n.to_string()),
        Value::String(s) => buf.push_str(&serde_json::to_string(s)?),
        Value::Array(arr) => {
            buf.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_canonical(item, buf)?;
            }
            buf.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            buf.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                buf.push_str(&serde_json::to_string(key)?);
                buf.push(':');
                write_canonical(val, buf)?;
            }
            buf.push('}');
        }
    }
    Ok(())
}
