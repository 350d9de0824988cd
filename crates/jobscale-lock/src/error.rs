//! Lock error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by advisory lock operations.
///
/// Contention alone is never an error for `try_lock`; it only becomes
/// [`LockError::Unavailable`] or [`LockError::Timeout`] when the caller
/// asked for the lock unconditionally.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {key} is held by another process")]
    Unavailable { key: String },

    #[error("timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },

    #[error("lock table error: {0}")]
    State(#[from] jobscale_state::StateError),

    #[error("lock database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type LockResult<T> = Result<T, LockError>;
