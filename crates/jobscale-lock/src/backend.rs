//! Lock backends and the strategy trait they resolve to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{MySqlPool, PgPool};

use jobscale_state::{SharedStore, StateStore};

use crate::error::LockResult;
use crate::key::LockIdentity;
use crate::mysql::MySqlNamedLock;
use crate::postgres::PgAdvisoryLock;
use crate::table::TableLock;

/// Rows in the lock table older than this are treated as abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// One backend-specific way of taking and dropping a lock.
///
/// A strategy value belongs to exactly one `AdvisoryLock` and may keep
/// per-lock state, such as the database session that holds the lock.
#[async_trait]
pub trait LockStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Non-blocking attempt. `Ok(false)` means another owner holds it.
    async fn try_acquire(&self, lock: &LockIdentity) -> LockResult<bool>;

    /// Release a lock held by this owner. `Ok(false)` if it was not held.
    async fn release(&self, lock: &LockIdentity) -> LockResult<bool>;

    /// Whether anyone currently holds the lock.
    async fn is_locked(&self, lock: &LockIdentity) -> LockResult<bool>;
}

/// Capability descriptor for the store that coordinates scaling runs.
#[derive(Debug, Clone)]
pub enum LockBackend {
    /// Postgres session-level advisory locks.
    Postgres(PgPool),
    /// MySQL named locks.
    MySql(MySqlPool),
    /// Row-per-key emulation in the local redb state store. Only processes
    /// sharing one `StateStore` value are coordinated, since redb admits a
    /// single process per file.
    Table {
        state: StateStore,
        stale_after: Duration,
    },
    /// Row-per-key emulation in `{prefix}autoscaler_locks` on Postgres,
    /// for poolers that break session-scoped advisory locks.
    SharedTable {
        store: SharedStore,
        stale_after: Duration,
    },
}

impl LockBackend {
    /// Table backend with the default stale timeout.
    pub fn table(state: StateStore) -> Self {
        Self::Table {
            state,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres_advisory",
            Self::MySql(_) => "mysql_named",
            Self::Table { .. } => "table",
            Self::SharedTable { .. } => "shared_table",
        }
    }

    /// Shared-table backend with the default stale timeout.
    pub fn shared_table(store: SharedStore) -> Self {
        Self::SharedTable {
            store,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Whether separate processes contend on this backend.
    pub fn is_cross_process(&self) -> bool {
        !matches!(self, Self::Table { .. })
    }

    /// Build a fresh strategy for one lock instance.
    pub fn strategy(&self) -> Arc<dyn LockStrategy> {
        match self {
            Self::Postgres(pool) => Arc::new(PgAdvisoryLock::new(pool.clone())),
            Self::MySql(pool) => Arc::new(MySqlNamedLock::new(pool.clone())),
            Self::Table { state, stale_after } => {
                Arc::new(TableLock::local(state.clone(), *stale_after))
            }
            Self::SharedTable { store, stale_after } => {
                Arc::new(TableLock::shared(store.clone(), *stale_after))
            }
        }
    }
}
