use base64::Engine;
use js_sys::{Array, ArrayBuffer, BigInt, Object, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;

use crate::errors::SQLiteBridgeError;

/// Rewrite bind values into the worker's wire form. BigInt and binary
/// values become tagged objects since they do not survive JSON.
pub(crate) fn encode_bind_values(params: Option<Array>) -> Result<Array, SQLiteBridgeError> {
    let Some(params) = params else {
        return Ok(Array::new());
    };
    let encoded = Array::new();
    for (i, value) in params.iter().enumerate() {
        encoded.push(&encode_bind_value(&value, i + 1)?);
    }
    Ok(encoded)
}

fn encode_bind_value(value: &JsValue, position: usize) -> Result<JsValue, SQLiteBridgeError> {
    if value.is_null() || value.is_undefined() {
        return Ok(JsValue::NULL);
    }
    if value.is_bigint() {
        let digits = value
            .unchecked_ref::<BigInt>()
            .to_string(10)
            .map_err(|e| SQLiteBridgeError::JsError(e.into()))?;
        return tagged("bigint", "value", &String::from(digits));
    }
    if let Some(bytes) = value.dyn_ref::<Uint8Array>() {
        return tagged("blob", "base64", &encode_base64(&bytes.to_vec()));
    }
    if let Some(buffer) = value.dyn_ref::<ArrayBuffer>() {
        let bytes = Uint8Array::new(buffer).to_vec();
        return tagged("blob", "base64", &encode_base64(&bytes));
    }
    if let Some(n) = value.as_f64() {
        if !n.is_finite() {
            return Err(bind_error(format!(
                "Invalid numeric value at position {position} (NaN/Infinity not supported.)"
            )));
        }
        return Ok(value.clone());
    }
    if value.as_bool().is_some() || value.is_string() {
        return Ok(value.clone());
    }
    Err(bind_error(format!(
        "Unsupported parameter type at position {position}"
    )))
}

fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn tagged(kind: &str, key: &str, payload: &str) -> Result<JsValue, SQLiteBridgeError> {
    let obj = Object::new();
    Reflect::set(&obj, &JsValue::from_str("__type"), &JsValue::from_str(kind))?;
    Reflect::set(&obj, &JsValue::from_str(key), &JsValue::from_str(payload))?;
    Ok(obj.into())
}

fn bind_error(msg: String) -> SQLiteBridgeError {
    SQLiteBridgeError::InvalidParams(msg)
}
