//! jobscale-autoscale — decide how many workers a job backlog needs and
//! apply it safely.
//!
//! Each worker group owns a [`WorkerConfig`], an advisory lock keyed by
//! `lock_key`, and cooldown timestamps. A [`Scaler`] composes a metrics
//! collector, an infrastructure adapter, the lock and the cooldown tracker
//! into one run; the [`Autoscaler`] holds every registered group and drives
//! them on an interval.
//!
//! # Decision algorithm
//!
//! ```text
//! up   = queue_depth >= scale_up_queue_depth  OR  latency >= scale_up_latency_seconds
//! down = (queue_depth <= scale_down_queue_depth AND latency <= scale_down_latency_seconds)
//!        OR idle
//!
//! fixed / step_function:  to = current ± increment/decrement
//! proportional (up):      to = current + max(ceil(jobs_over / jobs_per_worker),
//!                                            ceil(latency_over / latency_per_worker),
//!                                            increment)
//! proportional (down):    to = current - max(floor(jobs_under / jobs_per_worker), decrement)
//!                         or min_workers when idle
//!
//! every target is clamped to [min_workers, max_workers]
//! ```
//!
//! With zero workers, a lower scale-from-zero bar applies and the cooldown
//! check is skipped so a cold fleet gets its first worker quickly.

pub mod autoscaler;
pub mod config;
pub mod cooldown;
pub mod decision;
pub mod error;
pub mod events;
pub mod scaler;

pub use autoscaler::Autoscaler;
pub use config::{ConfigError, ScalingStrategy, WorkerConfig, WorkerSettings};
pub use cooldown::{CooldownState, CooldownStore, CooldownTracker, Direction};
pub use decision::{Decision, ScaleAction, decide};
pub use error::ScaleError;
pub use events::EventSink;
pub use scaler::{ScaleResult, Scaler};
