use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Function, Promise};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

use crate::errors::SQLiteBridgeError;
use crate::utils::describe_js_value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Readiness {
    Starting,
    Ready,
    Failed(String),
}

/// Tracks the worker's startup handshake. Every caller of [`wait`] gets
/// its own promise, settled when the worker reports ready or failed.
///
/// [`wait`]: WorkerReadiness::wait
#[derive(Clone)]
pub(crate) struct WorkerReadiness {
    state: Rc<RefCell<Readiness>>,
    waiters: Rc<RefCell<Vec<(Function, Function)>>>,
}

impl WorkerReadiness {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(Readiness::Starting)),
            waiters: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub(crate) fn state(&self) -> Readiness {
        self.state.borrow().clone()
    }

    pub(crate) async fn wait(&self) -> Result<(), SQLiteBridgeError> {
        match self.state() {
            Readiness::Ready => return Ok(()),
            Readiness::Failed(reason) => {
                return Err(SQLiteBridgeError::InitializationFailed(reason));
            }
            Readiness::Starting => {}
        }

        let waiters = Rc::clone(&self.waiters);
        let promise = Promise::new(&mut |resolve, reject| {
            waiters.borrow_mut().push((resolve, reject));
        });

        JsFuture::from(promise)
            .await
            .map(|_| ())
            .map_err(|err| SQLiteBridgeError::InitializationFailed(describe_js_value(&err)))
    }

    pub(crate) fn mark_ready(&self) {
        {
            let mut state = self.state.borrow_mut();
            if *state != Readiness::Starting {
                return;
            }
            *state = Readiness::Ready;
        }
        for (resolve, _) in self.take_waiters() {
            let _ = resolve.call0(&JsValue::NULL);
        }
    }

    pub(crate) fn mark_failed(&self, reason: String) {
        *self.state.borrow_mut() = Readiness::Failed(reason.clone());
        let reason = JsValue::from_str(&reason);
        for (_, reject) in self.take_waiters() {
            let _ = reject.call1(&JsValue::NULL, &reason);
        }
    }

    // Drained before calling out so a settled waiter can re-enter.
    fn take_waiters(&self) -> Vec<(Function, Function)> {
        std::mem::take(&mut *self.waiters.borrow_mut())
    }
}
