use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen_utils::prelude::{serde_wasm_bindgen, WasmEncodedError};

#[derive(Debug, Error)]
pub enum SQLiteBridgeError {
    #[error(transparent)]
    SerdeError(#[from] serde_wasm_bindgen::Error),
    #[error("JavaScript error: {0:?}")]
    JsError(JsValue),
    #[error("{0}")]
    InvalidParams(String),
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
    /// Error text reported by the worker for one request.
    #[error("{0}")]
    WorkerError(String),
    #[error("Unexpected result for {method}: {detail}")]
    UnexpectedResult { method: String, detail: String },
}

impl From<JsValue> for SQLiteBridgeError {
    fn from(value: JsValue) -> Self {
        SQLiteBridgeError::JsError(value)
    }
}

impl From<SQLiteBridgeError> for JsValue {
    fn from(value: SQLiteBridgeError) -> Self {
        JsError::new(&value.to_string()).into()
    }
}

impl From<SQLiteBridgeError> for WasmEncodedError {
    fn from(value: SQLiteBridgeError) -> Self {
        WasmEncodedError {
            msg: value.to_string(),
            readable_msg: value.to_string(),
        }
    }
}
