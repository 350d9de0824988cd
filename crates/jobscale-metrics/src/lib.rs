//! jobscale-metrics — backlog observation for jobscale.
//!
//! Produces immutable [`MetricsSnapshot`]s describing a job backlog: how many
//! jobs are waiting, how old the oldest one is, throughput, and how many
//! worker processes are alive. Snapshots feed the decision engine and can be
//! rendered in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector (trait)
//!   ├── StoreCollector     ← jobs/processes tables in the redb state store
//!   └── PostgresCollector  ← Solid Queue style tables over sqlx
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain, one series per worker group
//! ```

pub mod collector;
pub mod error;
pub mod postgres;
pub mod prometheus;

pub use collector::{MetricsCollector, StoreCollector};
pub use error::{MetricsError, MetricsResult};
pub use jobscale_state::MetricsSnapshot;
pub use postgres::PostgresCollector;
pub use prometheus::render_prometheus;
