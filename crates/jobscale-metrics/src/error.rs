//! Metrics collection errors.

use thiserror::Error;

/// Errors raised while reading the backlog store.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("state store error: {0}")]
    State(#[from] jobscale_state::StateError),

    #[error("backlog query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("invalid collector configuration: {0}")]
    Configuration(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;
