//! Storage error type and its mapping into the engine taxonomy.

use thiserror::Error;

use trellis_core::EngineError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation {0} is not reversible")]
    NotReversible(String),

    #[error("operation {0} was already rolled back")]
    AlreadyRolledBack(String),

    #[error("no rollback handler registered for action {0}")]
    NoHandler(String),

    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => EngineError::caller(format!("not found: {what}")),
            StoreError::NotReversible(id) => {
                EngineError::caller(format!("operation {id} is not reversible"))
            }
            StoreError::AlreadyRolledBack(id) => {
                EngineError::caller(format!("operation {id} was already rolled back"))
            }
            StoreError::NoHandler(action) => {
                EngineError::caller(format!("no rollback handler for action {action}"))
            }
            StoreError::InvalidValue(what) => EngineError::integrity(what),
            other => EngineError::permanent("store", other),
        }
    }
}
