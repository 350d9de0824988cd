//! jobscale-lock — cross-process mutual exclusion for scaling runs.
//!
//! An [`AdvisoryLock`] guarantees that at most one orchestration run per
//! worker group is inside its decide-and-apply section at a time, without an
//! external coordination service. The lock strategy is picked once, at
//! construction, from the [`LockBackend`] the caller injects:
//!
//! ```text
//! LockBackend::Postgres  → pg_try_advisory_lock on a held session
//! LockBackend::MySql     → GET_LOCK(name, 0) on a held session
//! LockBackend::Table     → one row per key in the redb `locks` table;
//!                          single process only, redb locks its file
//! LockBackend::SharedTable → one row per key in `{prefix}autoscaler_locks`
//!                          on Postgres, stale rows reaped before each attempt
//! ```
//!
//! Session-scoped backends release automatically if the holding process
//! dies. The table backends rely on stale reaping instead, which means a
//! legitimate holder that outlives the stale timeout can lose its lock.

pub mod backend;
pub mod error;
pub mod key;
pub mod lock;
pub mod mysql;
pub mod postgres;
pub mod table;

pub use backend::{LockBackend, LockStrategy};
pub use error::{LockError, LockResult};
pub use key::{LockIdentity, lock_id_for};
pub use lock::AdvisoryLock;
