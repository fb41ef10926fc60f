use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::errors::BridgeError;

/// A bind value decoded from its JSON form.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Decode the parameter at 1-based `position`.
    ///
    /// Besides JSON scalars, two extended objects are understood:
    /// `{"__type": "blob", "base64": ...}` and `{"__type": "bigint", "value": "..."}`.
    pub fn from_json(value: &Value, position: usize) -> Result<Self, BridgeError> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::Number(num) => {
                if let Some(v) = num.as_i64() {
                    Ok(SqlValue::Integer(v))
                } else if let Some(v) = num.as_f64() {
                    Ok(SqlValue::Real(v))
                } else {
                    Err(bind_error(format!(
                        "Unsupported numeric value at index {position}"
                    )))
                }
            }
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Object(map) => Self::from_extended(map, position),
            Value::Array(_) => Err(bind_error(format!(
                "Unsupported parameter type at index {position}: array"
            ))),
        }
    }

    fn from_extended(map: &Map<String, Value>, position: usize) -> Result<Self, BridgeError> {
        let Some(kind) = map.get("__type").and_then(Value::as_str) else {
            return Err(bind_error(format!(
                "Unsupported parameter type at index {position}: object"
            )));
        };
        match kind {
            "blob" => {
                let encoded = map
                    .get("base64")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        bind_error(format!("Invalid blob parameter at index {position}"))
                    })?;
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map(SqlValue::Blob)
                    .map_err(|_| bind_error(format!("Invalid base64 for blob at index {position}")))
            }
            "bigint" => {
                let digits = map.get("value").and_then(Value::as_str).ok_or_else(|| {
                    bind_error(format!("Invalid bigint parameter at index {position}"))
                })?;
                digits
                    .parse::<i64>()
                    .map(SqlValue::Integer)
                    .map_err(|_| bind_error(format!("BigInt out of i64 range at index {position}.")))
            }
            other => Err(bind_error(format!(
                "Unsupported parameter type at index {position}: {other}"
            ))),
        }
    }
}

/// JSON form of a BLOB column, mirroring the blob parameter encoding.
pub fn blob_to_json(bytes: &[u8]) -> Value {
    json!({
        "__type": "blob",
        "base64": base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Largest integer a JS number holds exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// JSON form of an INTEGER column. Values a JS number cannot hold exactly
/// use the bigint parameter encoding.
pub fn integer_to_json(v: i64) -> Value {
    if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&v) {
        Value::from(v)
    } else {
        json!({"__type": "bigint", "value": v.to_string()})
    }
}

pub fn decode_params(params: &[Value]) -> Result<Vec<SqlValue>, BridgeError> {
    params
        .iter()
        .enumerate()
        .map(|(i, v)| SqlValue::from_json(v, i + 1))
        .collect()
}

/// Check a statement's placeholders against the number of supplied values.
///
/// `names[k]` is the name SQLite reports for slot `k + 1`: `None` for a bare
/// `?` (or a `?N` index that is never used), `Some("?N")` for numbered ones.
/// Slot `k + 1` always binds `params[k]`.
pub fn validate_placeholders(names: &[Option<String>], provided: usize) -> Result<(), BridgeError> {
    if names.is_empty() {
        if provided > 0 {
            return Err(bind_error(format!(
                "No parameters expected but {provided} provided."
            )));
        }
        return Ok(());
    }

    let mut numbered = false;
    for name in names.iter().flatten() {
        let Some(digits) = name.strip_prefix('?') else {
            return Err(bind_error("Named parameters not supported.".to_string()));
        };
        match digits.parse::<i64>() {
            Ok(n) if n > 0 => numbered = true,
            Ok(_) => {
                return Err(bind_error(
                    "Invalid parameter index: ?0 or negative indices are not allowed."
                        .to_string(),
                ))
            }
            Err(_) => return Err(bind_error(format!("Invalid parameter index: {name}"))),
        }
    }

    if numbered {
        if let Some(gap) = names.iter().position(Option::is_none) {
            return Err(bind_error(format!(
                "Missing parameter index ?{} in statement (indices must be continuous and '?' cannot be mixed with '?N').",
                gap + 1
            )));
        }
    }

    if provided != names.len() {
        return Err(bind_error(format!(
            "Expected {} parameters but got {provided}.",
            names.len()
        )));
    }
    Ok(())
}

fn bind_error(msg: String) -> BridgeError {
    BridgeError::Engine(msg)
}
