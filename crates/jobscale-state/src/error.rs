//! Error types for the jobscale state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    /// redb allows one process per file; another process already holds it.
    #[error("{0} is already open in another process")]
    InUse(String),

    #[error("shared store error: {0}")]
    Database(String),

    #[error("table prefix {0:?} must match [a-z_][a-z0-9_]*")]
    InvalidTablePrefix(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}
