use std::cell::RefCell;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::engine::{Engine, EngineLoader, InitOptions, StatementId};
use crate::errors::BridgeError;
use crate::messages::{Method, RequestEnvelope, ResponseEnvelope};
use crate::session::{Session, SessionStatus};

/// Routes request envelopes to the session's database handle.
///
/// Every call to [`WorkerBridge::handle`] produces exactly one response whose
/// id is the request's id. The session is never borrowed across an await, so
/// requests spawned while `init` is loading observe `Initializing` and are
/// rejected instead of racing the load.
pub struct WorkerBridge<L: EngineLoader> {
    loader: L,
    session: RefCell<Session<L::Engine>>,
}

impl<L: EngineLoader> WorkerBridge<L> {
    pub fn new(loader: L) -> Self {
        WorkerBridge {
            loader,
            session: RefCell::new(Session::new()),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.session.borrow().status()
    }

    pub async fn handle(&self, request: RequestEnvelope) -> ResponseEnvelope {
        debug!("[Worker] {} (id {})", request.method, request.id);
        match self.dispatch(&request).await {
            Ok(result) => ResponseEnvelope::success(request.id, result),
            Err(err) => {
                warn!(
                    "[Worker] {} (id {}) failed: {}",
                    request.method, request.id, err
                );
                ResponseEnvelope::failure(request.id, &err)
            }
        }
    }

    async fn dispatch(&self, request: &RequestEnvelope) -> Result<Value, BridgeError> {
        let method: Method = request.method.parse()?;
        let params = request.params();

        match method {
            Method::Init => {
                at_most(method, params, 1)?;
                let options = init_options(params.first())?;
                self.init(options).await
            }
            Method::Execute => {
                at_most(method, params, 2)?;
                let sql = sql_param(method, params)?;
                let binds = bind_params(method, params.get(1))?;
                let results = self.with_engine(|engine| engine.exec(sql, binds))?;
                to_json(&results)
            }
            Method::Prepare => {
                at_most(method, params, 1)?;
                let sql = sql_param(method, params)?;
                let statement = self.with_engine(|engine| engine.prepare(sql))?;
                Ok(Value::from(statement))
            }
            Method::Run => {
                at_most(method, params, 2)?;
                let statement = statement_param(method, params)?;
                let binds = bind_params(method, params.get(1))?;
                let result = self.with_engine(|engine| engine.run(statement, binds))?;
                to_json(&result)
            }
            Method::Free => {
                at_most(method, params, 1)?;
                let statement = statement_param(method, params)?;
                self.with_engine(|engine| engine.free(statement))?;
                Ok(Value::Bool(true))
            }
            Method::Close => {
                at_most(method, params, 0)?;
                self.session.borrow_mut().close()?;
                info!("[Worker] Database closed");
                Ok(Value::Null)
            }
        }
    }

    async fn init(&self, options: InitOptions) -> Result<Value, BridgeError> {
        self.session.borrow_mut().begin_init()?;
        info!(
            "[Worker] Initializing database ({})",
            options.persistent_name().unwrap_or(":memory:")
        );
        let loaded = self.loader.load(options).await;
        self.session.borrow_mut().finish_init(loaded)?;
        info!("[Worker] Database initialized");
        Ok(Value::Null)
    }

    fn with_engine<T>(
        &self,
        op: impl FnOnce(&mut L::Engine) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let mut session = self.session.borrow_mut();
        op(session.engine_mut()?)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, BridgeError> {
    serde_json::to_value(value)
        .map_err(|e| BridgeError::Engine(format!("JSON serialization error: {e}")))
}

fn at_most(method: Method, params: &[Value], max: usize) -> Result<(), BridgeError> {
    if params.len() > max {
        return Err(BridgeError::invalid_params(
            method.as_str(),
            format!("expected at most {max} params but got {}", params.len()),
        ));
    }
    Ok(())
}

fn init_options(raw: Option<&Value>) -> Result<InitOptions, BridgeError> {
    match raw {
        None | Some(Value::Null) => Ok(InitOptions::default()),
        Some(value) if value.is_object() => serde_json::from_value(value.clone())
            .map_err(|e| BridgeError::invalid_params("init", e.to_string())),
        Some(_) => Err(BridgeError::invalid_params(
            "init",
            "options must be an object",
        )),
    }
}

fn sql_param(method: Method, params: &[Value]) -> Result<&str, BridgeError> {
    params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::invalid_params(method.as_str(), "missing SQL string"))
}

fn bind_params(method: Method, raw: Option<&Value>) -> Result<&[Value], BridgeError> {
    match raw {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(values)) => Ok(values.as_slice()),
        Some(_) => Err(BridgeError::invalid_params(
            method.as_str(),
            "params must be an array",
        )),
    }
}

fn statement_param(method: Method, params: &[Value]) -> Result<StatementId, BridgeError> {
    params
        .first()
        .and_then(Value::as_u64)
        .and_then(|n| StatementId::try_from(n).ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| BridgeError::invalid_params(method.as_str(), "missing statement id"))
}
