use thiserror::Error;

use crate::engine::StatementId;

/// Everything that can go wrong while serving a request. The `Display` text is
/// what travels back to the host in the `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error("Invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Database not initialized")]
    NotInitialized,
    #[error("Database is initializing")]
    Initializing,
    #[error("Database already initialized")]
    AlreadyInitialized,
    #[error("Database is closed")]
    Closed,
    #[error("Failed to load database engine: {0}")]
    LoadFailed(String),
    #[error("{0}")]
    Engine(String),
    #[error("Unknown statement: {0}")]
    UnknownStatement(StatementId),
}

impl BridgeError {
    pub(crate) fn invalid_params(method: &str, reason: impl Into<String>) -> Self {
        BridgeError::InvalidParams {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<String> for BridgeError {
    fn from(value: String) -> Self {
        BridgeError::Engine(value)
    }
}
