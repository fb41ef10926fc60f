use wasm_bindgen::prelude::*;

/// Human readable text for a rejection value or worker payload.
pub(crate) fn describe_js_value(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        return s;
    }
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return String::from(err.message());
    }
    if let Some(n) = value.as_f64() {
        if n.fract() == 0.0 {
            return format!("{n:.0}");
        }
        return format!("{n}");
    }
    format!("{value:?}")
}

/// JSON text of a value posted by the worker. `undefined` reads as `null`.
pub(crate) fn to_json_text(value: &JsValue) -> Result<String, JsValue> {
    if value.is_undefined() {
        return Ok("null".to_string());
    }
    js_sys::JSON::stringify(value)?
        .as_string()
        .ok_or_else(|| JsValue::from_str("Result is not JSON serializable"))
}
