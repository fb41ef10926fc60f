use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;

use futures::channel::oneshot;
use serde_json::Value;

use crate::engine::{Engine, EngineLoader, InitOptions, QueryResult, StatementId};
use crate::errors::BridgeError;

/// Echoes SQL and bound params back as a one-row result. SQL containing
/// `FAIL` errors out.
#[derive(Default)]
pub struct FakeEngine {
    pub options: InitOptions,
    pub executed: Vec<String>,
    pub statements: HashMap<StatementId, String>,
    pub next_statement: StatementId,
    pub fail_close: bool,
}

impl FakeEngine {
    fn echo(sql: &str, params: &[Value]) -> Result<QueryResult, BridgeError> {
        if sql.contains("FAIL") {
            return Err(BridgeError::Engine(format!("near \"FAIL\": syntax error in {sql}")));
        }
        let mut row = vec![Value::String(sql.to_string())];
        row.extend(params.iter().cloned());
        Ok(QueryResult {
            columns: (0..row.len()).map(|i| format!("c{i}")).collect(),
            values: vec![row],
        })
    }
}

impl Engine for FakeEngine {
    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<Vec<QueryResult>, BridgeError> {
        let result = Self::echo(sql, params)?;
        self.executed.push(sql.to_string());
        Ok(vec![result])
    }

    fn prepare(&mut self, sql: &str) -> Result<StatementId, BridgeError> {
        Self::echo(sql, &[])?;
        self.next_statement += 1;
        self.statements.insert(self.next_statement, sql.to_string());
        Ok(self.next_statement)
    }

    fn run(
        &mut self,
        statement: StatementId,
        params: &[Value],
    ) -> Result<QueryResult, BridgeError> {
        let sql = self
            .statements
            .get(&statement)
            .ok_or(BridgeError::UnknownStatement(statement))?;
        Self::echo(sql, params)
    }

    fn free(&mut self, statement: StatementId) -> Result<(), BridgeError> {
        self.statements
            .remove(&statement)
            .map(|_| ())
            .ok_or(BridgeError::UnknownStatement(statement))
    }

    fn close(&mut self) -> Result<(), BridgeError> {
        if self.fail_close {
            return Err(BridgeError::Engine("database is locked".to_string()));
        }
        self.statements.clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLoader {
    pub fail: bool,
    pub loads: Cell<usize>,
    gate: RefCell<Option<oneshot::Receiver<()>>>,
}

impl FakeLoader {
    pub fn failing() -> Self {
        FakeLoader {
            fail: true,
            ..FakeLoader::default()
        }
    }

    /// The first load waits until the returned sender fires.
    pub fn gated() -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let loader = FakeLoader {
            gate: RefCell::new(Some(rx)),
            ..FakeLoader::default()
        };
        (loader, tx)
    }
}

impl EngineLoader for FakeLoader {
    type Engine = FakeEngine;

    fn load(
        &self,
        options: InitOptions,
    ) -> impl Future<Output = Result<FakeEngine, BridgeError>> {
        self.loads.set(self.loads.get() + 1);
        let gate = self.gate.borrow_mut().take();
        let fail = self.fail;
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if fail {
                return Err(BridgeError::LoadFailed("network unreachable".to_string()));
            }
            Ok(FakeEngine {
                options,
                ..FakeEngine::default()
            })
        }
    }
}
