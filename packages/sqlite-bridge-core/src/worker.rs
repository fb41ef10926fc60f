// worker.rs - This module runs in the worker context
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use log::{error, warn};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{DedicatedWorkerGlobalScope, MessageEvent};

use crate::bridge::WorkerBridge;
use crate::database::SQLiteLoader;
use crate::errors::BridgeError;
use crate::messages::{ControlMessage, RequestEnvelope, RequestId, ResponseEnvelope};

/// Set by the generated worker script before the module starts.
pub const LOG_LEVEL_GLOBAL: &str = "__SQLITE_BRIDGE_LOG_LEVEL";

thread_local! {
    static BRIDGE: RefCell<Option<Rc<WorkerBridge<SQLiteLoader>>>> = const { RefCell::new(None) };
}

/// Entry point for the worker - called from the generated script
pub fn main() -> Result<(), JsValue> {
    init_logging();

    let bridge = Rc::new(WorkerBridge::new(SQLiteLoader));
    BRIDGE.with(|b| {
        *b.borrow_mut() = Some(bridge);
    });

    let worker_scope = worker_scope();
    let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
        handle_message(event.data());
    }) as Box<dyn FnMut(MessageEvent)>);

    worker_scope.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();

    post(&worker_scope, &ControlMessage::WorkerReady)
}

/// Tell the host the worker will never become ready.
pub fn report_startup_failure(err: &JsValue) {
    let reason = err
        .as_string()
        .unwrap_or_else(|| format!("Worker startup failed: {err:?}"));
    error!("[Worker] {reason}");
    let _ = post(
        &worker_scope(),
        &ControlMessage::WorkerError { error: reason },
    );
}

fn init_logging() {
    let level = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str(LOG_LEVEL_GLOBAL))
        .ok()
        .and_then(|v| v.as_string())
        .and_then(|s| log::Level::from_str(&s).ok())
        .unwrap_or(log::Level::Info);
    console_log::init_with_level(level).ok();
}

fn worker_scope() -> DedicatedWorkerGlobalScope {
    js_sys::global().unchecked_into()
}

fn handle_message(data: JsValue) {
    let request = match serde_wasm_bindgen::from_value::<RequestEnvelope>(data.clone()) {
        Ok(request) => request,
        Err(err) => {
            reject_malformed(&data, err.to_string());
            return;
        }
    };

    let Some(bridge) = BRIDGE.with(|b| b.borrow().clone()) else {
        error!("[Worker] Message received before the bridge was installed");
        return;
    };

    spawn_local(async move {
        let response = bridge.handle(request).await;
        respond(&worker_scope(), response);
    });
}

fn reject_malformed(data: &JsValue, reason: String) {
    match malformed_response(data, reason.clone()) {
        Some(response) => respond(&worker_scope(), response),
        None => warn!("[Worker] Dropping message without id: {reason}"),
    }
}

/// Error response for an unparseable envelope, if it still carries a usable id.
fn malformed_response(data: &JsValue, reason: String) -> Option<ResponseEnvelope> {
    let id = js_sys::Reflect::get(data, &JsValue::from_str("id"))
        .ok()
        .and_then(|v| serde_wasm_bindgen::from_value::<RequestId>(v).ok())?;
    Some(ResponseEnvelope::failure(id, &BridgeError::InvalidRequest(reason)))
}

/// Post a response. If it cannot be encoded, post an error under the same id
/// so the request is still answered.
fn respond(scope: &DedicatedWorkerGlobalScope, response: ResponseEnvelope) {
    let Err(err) = post(scope, &response) else {
        return;
    };
    let reason = err.as_string().unwrap_or_else(|| format!("{err:?}"));
    error!("[Worker] Failed to post response {}: {reason}", response.id);

    let fallback = ResponseEnvelope::failure(
        response.id,
        &BridgeError::Engine(format!("Failed to encode response: {reason}")),
    );
    if let Err(err) = post(scope, &fallback) {
        error!("[Worker] Failed to post fallback {}: {err:?}", fallback.id);
    }
}

fn post<T: Serialize>(scope: &DedicatedWorkerGlobalScope, message: &T) -> Result<(), JsValue> {
    let value = message.serialize(&serde_wasm_bindgen::Serializer::json_compatible())?;
    scope.post_message(&value)
}
