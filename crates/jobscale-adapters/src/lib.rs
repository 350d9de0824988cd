//! jobscale-adapters — where scaling decisions meet real infrastructure.
//!
//! An [`InfrastructureAdapter`] answers two questions for one worker group
//! ("how many workers run now?" and "run N workers") on a specific platform.
//! Adapters retry transient failures with bounded exponential backoff,
//! treat a missing fleet as zero workers, and honour dry-run mode by logging
//! the intended change without calling the platform.
//!
//! # Adapters
//!
//! ```text
//! heroku      → Platform API formation (dyno quantity per process type)
//! kubernetes  → apps/v1 Deployment scale subresource (replicas)
//! ```

pub mod adapter;
pub mod error;
pub mod heroku;
mod http;
pub mod kubernetes;
pub mod registry;
pub mod retry;

pub use adapter::InfrastructureAdapter;
pub use error::{AdapterError, AdapterResult};
pub use heroku::{HerokuAdapter, HerokuSettings};
pub use kubernetes::{KubernetesAdapter, KubernetesSettings};
pub use registry::{ADAPTER_KINDS, AdapterKind, AdapterSettings, build_adapter};
pub use retry::RetryPolicy;
