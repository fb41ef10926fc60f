use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use js_sys::{Array, Object, Promise, Reflect};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_utils::prelude::*;
use web_sys::Worker;

use crate::errors::SQLiteBridgeError;
use crate::params::encode_bind_values;
use crate::ready::WorkerReadiness;
use crate::utils::{describe_js_value, to_json_text};
use crate::worker::{create_worker_from_code, install_onmessage_handler, PendingCalls};
use crate::worker_template::{generate_worker_script, WorkerOptions};

/// Host-side handle to a database running in a dedicated worker.
#[wasm_bindgen]
pub struct SQLiteBridge {
    worker: Worker,
    pending: PendingCalls,
    next_request_id: Rc<RefCell<u32>>,
    readiness: WorkerReadiness,
}

impl Serialize for SQLiteBridge {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let state = serializer.serialize_struct("SQLiteBridge", 0)?;
        state.end()
    }
}

#[wasm_export]
impl SQLiteBridge {
    /// Spawn the worker and wait for it to report ready.
    ///
    /// `options` may carry `moduleUrl`, `wasmUrl` and `logLevel`.
    #[wasm_export(js_name = "new", preserve_js_class)]
    pub async fn new(options: Option<Object>) -> Result<SQLiteBridge, SQLiteBridgeError> {
        let options = parse_worker_options(options)?;
        let bridge = Self::spawn(&options)?;
        bridge.readiness.wait().await?;
        Ok(bridge)
    }

    fn spawn(options: &WorkerOptions) -> Result<SQLiteBridge, SQLiteBridgeError> {
        let worker = create_worker_from_code(&generate_worker_script(options))?;

        let pending: PendingCalls = Rc::new(RefCell::new(HashMap::new()));
        let readiness = WorkerReadiness::new();
        install_onmessage_handler(&worker, Rc::clone(&pending), readiness.clone());

        Ok(SQLiteBridge {
            worker,
            pending,
            next_request_id: Rc::new(RefCell::new(1u32)),
            readiness,
        })
    }

    /// Open the database. Pass `{ dbName }` for persistent storage,
    /// omit it for an in-memory database.
    #[wasm_export(js_name = "init", unchecked_return_type = "string")]
    pub async fn init(&self, options: Option<Object>) -> Result<String, SQLiteBridgeError> {
        let params = Array::new();
        if let Some(options) = options {
            params.push(&options);
        }
        self.call_json("init", params).await
    }

    /// Run one or more statements. Resolves to JSON text of
    /// `[{ columns, values }]`, one entry per statement that returned rows.
    #[wasm_export(js_name = "execute", unchecked_return_type = "string")]
    pub async fn execute(
        &self,
        sql: &str,
        params: Option<Array>,
    ) -> Result<String, SQLiteBridgeError> {
        let binds = encode_bind_values(params)?;
        let call_params = Array::new();
        call_params.push(&JsValue::from_str(sql));
        if binds.length() > 0 {
            call_params.push(&binds);
        }
        self.call_json("execute", call_params).await
    }

    /// Compile a statement for repeated `run` calls.
    #[wasm_export(js_name = "prepare", unchecked_return_type = "number")]
    pub async fn prepare(&self, sql: &str) -> Result<u32, SQLiteBridgeError> {
        let value = self.call("prepare", Array::of1(&JsValue::from_str(sql))).await?;
        statement_id_result(&value)
    }

    /// Run a prepared statement. Resolves to JSON text of `{ columns, values }`.
    #[wasm_export(js_name = "run", unchecked_return_type = "string")]
    pub async fn run(
        &self,
        statement_id: u32,
        params: Option<Array>,
    ) -> Result<String, SQLiteBridgeError> {
        let binds = encode_bind_values(params)?;
        let call_params = Array::of1(&JsValue::from_f64(statement_id as f64));
        if binds.length() > 0 {
            call_params.push(&binds);
        }
        self.call_json("run", call_params).await
    }

    #[wasm_export(js_name = "free", unchecked_return_type = "boolean")]
    pub async fn free(&self, statement_id: u32) -> Result<bool, SQLiteBridgeError> {
        let value = self
            .call("free", Array::of1(&JsValue::from_f64(statement_id as f64)))
            .await?;
        free_result(&value)
    }

    /// Close the database. The worker stays up but rejects later requests.
    #[wasm_export(js_name = "close", unchecked_return_type = "string")]
    pub async fn close(&self) -> Result<String, SQLiteBridgeError> {
        self.call_json("close", Array::new()).await
    }

    async fn call_json(&self, method: &str, params: Array) -> Result<String, SQLiteBridgeError> {
        let value = self.call(method, params).await?;
        Ok(to_json_text(&value)?)
    }

    /// Post `{ id, method, params }` and wait for the matching response.
    async fn call(&self, method: &str, params: Array) -> Result<JsValue, SQLiteBridgeError> {
        self.readiness.wait().await?;

        let request_id = self.next_id();
        let message = Object::new();
        Reflect::set(
            &message,
            &JsValue::from_str("id"),
            &JsValue::from_f64(request_id as f64),
        )?;
        Reflect::set(
            &message,
            &JsValue::from_str("method"),
            &JsValue::from_str(method),
        )?;
        Reflect::set(&message, &JsValue::from_str("params"), &params)?;

        let worker = &self.worker;
        let pending = Rc::clone(&self.pending);
        let promise = Promise::new(&mut |resolve, reject| {
            match worker.post_message(&message) {
                Ok(()) => {
                    pending.borrow_mut().insert(request_id, (resolve, reject));
                }
                Err(err) => {
                    let _ = reject.call1(&JsValue::NULL, &err);
                }
            }
        });

        JsFuture::from(promise)
            .await
            .map_err(|err| SQLiteBridgeError::WorkerError(describe_js_value(&err)))
    }

    fn next_id(&self) -> u32 {
        let mut n = self.next_request_id.borrow_mut();
        let id = *n;
        *n = n.wrapping_add(1).max(1);
        id
    }
}

fn statement_id_result(value: &JsValue) -> Result<u32, SQLiteBridgeError> {
    value
        .as_f64()
        .filter(|n| n.fract() == 0.0 && *n >= 1.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32)
        .ok_or_else(|| unexpected("prepare", value))
}

fn free_result(value: &JsValue) -> Result<bool, SQLiteBridgeError> {
    value.as_bool().ok_or_else(|| unexpected("free", value))
}

fn unexpected(method: &str, value: &JsValue) -> SQLiteBridgeError {
    SQLiteBridgeError::UnexpectedResult {
        method: method.to_string(),
        detail: describe_js_value(value),
    }
}

fn parse_worker_options(options: Option<Object>) -> Result<WorkerOptions, SQLiteBridgeError> {
    let options: WorkerOptions = match options {
        Some(obj) => serde_wasm_bindgen::from_value(obj.into())
            .map_err(|e| SQLiteBridgeError::InvalidOptions(e.to_string()))?,
        None => WorkerOptions::default(),
    };
    options
        .validate()
        .map_err(SQLiteBridgeError::InvalidOptions)?;
    Ok(options)
}

#[cfg(all(test, target_family = "wasm"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn options_default_when_absent() {
        assert_eq!(parse_worker_options(None).unwrap(), WorkerOptions::default());
    }

    #[wasm_bindgen_test]
    fn options_parse_from_js_object() {
        let obj = Object::new();
        Reflect::set(&obj, &"moduleUrl".into(), &"/pkg/core.js".into()).unwrap();
        Reflect::set(&obj, &"logLevel".into(), &"trace".into()).unwrap();

        let opts = parse_worker_options(Some(obj)).unwrap();
        assert_eq!(opts.module_url(), "/pkg/core.js");
        assert_eq!(opts.log_level(), "trace");
    }

    #[wasm_bindgen_test]
    fn bad_options_are_rejected() {
        let obj = Object::new();
        Reflect::set(&obj, &"logLevel".into(), &"chatty".into()).unwrap();
        assert!(matches!(
            parse_worker_options(Some(obj)),
            Err(SQLiteBridgeError::InvalidOptions(_))
        ));

        let obj = Object::new();
        Reflect::set(&obj, &"wasmUrl".into(), &JsValue::from_f64(1.0)).unwrap();
        assert!(matches!(
            parse_worker_options(Some(obj)),
            Err(SQLiteBridgeError::InvalidOptions(_))
        ));
    }

    #[wasm_bindgen_test]
    fn free_accepts_only_booleans() {
        assert!(free_result(&JsValue::TRUE).unwrap());
        assert!(!free_result(&JsValue::FALSE).unwrap());

        for value in [JsValue::NULL, JsValue::UNDEFINED, JsValue::from_str("true")] {
            match free_result(&value) {
                Err(SQLiteBridgeError::UnexpectedResult { method, .. }) => {
                    assert_eq!(method, "free")
                }
                other => panic!("Expected UnexpectedResult, got {other:?}"),
            }
        }
    }

    #[wasm_bindgen_test]
    fn prepare_requires_positive_integer_id() {
        assert_eq!(statement_id_result(&JsValue::from_f64(3.0)).unwrap(), 3);
        for value in [
            JsValue::from_f64(0.0),
            JsValue::from_f64(1.5),
            JsValue::from_f64(-2.0),
            JsValue::from_str("1"),
        ] {
            let err = statement_id_result(&value).unwrap_err();
            assert!(err.to_string().starts_with("Unexpected result for prepare"), "{err}");
        }
    }

    #[wasm_bindgen_test(async)]
    async fn failed_worker_rejects_calls() {
        let obj = Object::new();
        Reflect::set(&obj, &"moduleUrl".into(), &"/does-not-exist.js".into()).unwrap();
        let options = parse_worker_options(Some(obj)).unwrap();
        let bridge = SQLiteBridge::spawn(&options).unwrap();

        let err = bridge.execute("SELECT 1", None).await.unwrap_err();
        assert!(
            matches!(err, SQLiteBridgeError::InitializationFailed(_)),
            "{err:?}"
        );
        assert!(bridge.pending.borrow().is_empty());
    }

    #[wasm_bindgen_test]
    fn request_ids_skip_zero_on_wrap() {
        let options = WorkerOptions::default();
        let bridge = SQLiteBridge::spawn(&options).unwrap();
        *bridge.next_request_id.borrow_mut() = u32::MAX;
        assert_eq!(bridge.next_id(), u32::MAX);
        assert_eq!(bridge.next_id(), 1);
        assert_eq!(bridge.next_id(), 2);
    }
}
