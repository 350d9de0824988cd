//! Errors surfaced by the orchestrator and the worker registry.

use thiserror::Error;

use jobscale_adapters::AdapterError;
use jobscale_lock::LockError;
use jobscale_metrics::MetricsError;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("metrics collection failed: {0}")]
    Metrics(#[from] MetricsError),

    #[error("adapter call failed: {0}")]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown worker '{0}'")]
    UnknownWorker(String),
}
