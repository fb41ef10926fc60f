use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use js_sys::{Array, Function, Reflect};
use serde::Deserialize;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_utils::prelude::serde_wasm_bindgen;
use web_sys::{Blob, BlobPropertyBag, MessageEvent, Url, Worker};

use crate::ready::WorkerReadiness;
use crate::utils::describe_js_value;

/// Calls awaiting a response, keyed by request id.
pub(crate) type PendingCalls = Rc<RefCell<HashMap<u32, (Function, Function)>>>;

pub(crate) fn create_worker_from_code(worker_code: &str) -> Result<Worker, JsValue> {
    let blob_parts = Array::new();
    blob_parts.push(&JsValue::from_str(worker_code));

    let blob_options = BlobPropertyBag::new();
    blob_options.set_type("application/javascript");

    let blob = Blob::new_with_str_sequence_and_options(&blob_parts, &blob_options)?;
    let worker_url = Url::create_object_url_with_blob(&blob)?;
    let worker = Worker::new(&worker_url);
    Url::revoke_object_url(&worker_url)?;
    worker
}

pub(crate) fn install_onmessage_handler(
    worker: &Worker,
    pending: PendingCalls,
    readiness: WorkerReadiness,
) {
    let onmessage = Closure::wrap(Box::new(move |event: MessageEvent| {
        let data = event.data();
        if handle_control_message(&data, &readiness) {
            return;
        }
        handle_response_message(&data, &pending);
    }) as Box<dyn FnMut(MessageEvent)>);

    worker.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ControlMessage {
    #[serde(rename = "worker-ready")]
    Ready,
    #[serde(rename = "worker-error")]
    Error,
}

/// Returns true when `data` was a startup signal rather than a response.
pub(crate) fn handle_control_message(data: &JsValue, readiness: &WorkerReadiness) -> bool {
    match serde_wasm_bindgen::from_value::<ControlMessage>(data.clone()) {
        Ok(ControlMessage::Ready) => {
            readiness.mark_ready();
            true
        }
        Ok(ControlMessage::Error) => {
            let reason = present_field(data, "error")
                .map(|val| describe_js_value(&val))
                .unwrap_or_else(|| "Unknown worker error".to_string());
            readiness.mark_failed(reason);
            true
        }
        Err(_) => false,
    }
}

/// Settle the pending call named by the response id. Responses for ids
/// that are not pending are dropped.
pub(crate) fn handle_response_message(data: &JsValue, pending: &PendingCalls) {
    let Some(id) = present_field(data, "id").and_then(|v| v.as_f64()) else {
        log::warn!("Dropping worker message without a numeric id");
        return;
    };
    if id.fract() != 0.0 || !(0.0..=u32::MAX as f64).contains(&id) {
        log::warn!("Dropping worker message with foreign id {id}");
        return;
    }

    let Some((resolve, reject)) = pending.borrow_mut().remove(&(id as u32)) else {
        log::warn!("Dropping response for unknown request {id}");
        return;
    };

    if let Some(error) = present_field(data, "error") {
        let _ = reject.call1(&JsValue::NULL, &JsValue::from_str(&describe_js_value(&error)));
        return;
    }

    let result = Reflect::get(data, &JsValue::from_str("result")).unwrap_or(JsValue::NULL);
    let _ = resolve.call1(&JsValue::NULL, &result);
}

fn present_field(data: &JsValue, key: &str) -> Option<JsValue> {
    Reflect::get(data, &JsValue::from_str(key))
        .ok()
        .filter(|v| !v.is_null() && !v.is_undefined())
}
