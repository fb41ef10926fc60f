use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::BridgeError;

pub type StatementId = u32;

/// Columns and rows produced by one statement.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Value>>,
}

/// Options accepted by `init`. Without a database name the engine runs in memory.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct InitOptions {
    #[serde(rename = "dbName", default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
}

impl InitOptions {
    pub fn persistent_name(&self) -> Option<&str> {
        self.db_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// A live database handle.
pub trait Engine {
    /// Run one or more statements. `params` binds the single statement in `sql`.
    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<Vec<QueryResult>, BridgeError>;

    fn prepare(&mut self, sql: &str) -> Result<StatementId, BridgeError>;

    /// Reset, bind and step a prepared statement until it is done.
    fn run(&mut self, statement: StatementId, params: &[Value])
        -> Result<QueryResult, BridgeError>;

    fn free(&mut self, statement: StatementId) -> Result<(), BridgeError>;

    /// Release the handle. Prepared statements are finalized first.
    fn close(&mut self) -> Result<(), BridgeError>;
}

/// Produces the engine for `init`. Loading may suspend.
pub trait EngineLoader {
    type Engine: Engine;

    fn load(&self, options: InitOptions)
        -> impl Future<Output = Result<Self::Engine, BridgeError>>;
}
