//! Table-based lock for stores without a usable native lock primitive.
//!
//! Acquisition inserts a row keyed by the lock key and fails if one exists.
//! Release deletes the row only when this owner wrote it. Before every
//! attempt, rows older than the stale timeout are purged so a holder that
//! crashed without releasing cannot wedge the worker group forever.
//!
//! Rows live either in the local redb store (one process) or in the shared
//! Postgres table (any number of processes and hosts).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use jobscale_state::{LockRecord, SharedStore, StateStore};

use crate::backend::LockStrategy;
use crate::error::LockResult;
use crate::key::LockIdentity;

enum Rows {
    Local(StateStore),
    Shared(SharedStore),
}

pub struct TableLock {
    rows: Rows,
    stale_after: chrono::Duration,
}

impl TableLock {
    pub fn local(state: StateStore, stale_after: Duration) -> Self {
        Self::with_rows(Rows::Local(state), stale_after)
    }

    pub fn shared(store: SharedStore, stale_after: Duration) -> Self {
        Self::with_rows(Rows::Shared(store), stale_after)
    }

    fn with_rows(rows: Rows, stale_after: Duration) -> Self {
        Self {
            rows,
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or(chrono::Duration::seconds(300)),
        }
    }
}

#[async_trait]
impl LockStrategy for TableLock {
    fn name(&self) -> &'static str {
        match self.rows {
            Rows::Local(_) => "table",
            Rows::Shared(_) => "shared_table",
        }
    }

    async fn try_acquire(&self, lock: &LockIdentity) -> LockResult<bool> {
        let now = Utc::now();
        let record = LockRecord {
            lock_key: lock.key.clone(),
            lock_id: lock.id,
            locked_at: now,
            locked_owner: lock.owner.clone(),
        };
        let stale_before = now - self.stale_after;
        let acquired = match &self.rows {
            Rows::Local(state) => state.insert_lock_if_absent(&record, stale_before)?,
            Rows::Shared(store) => store.insert_lock_if_absent(&record, stale_before).await?,
        };
        debug!(key = %lock.key, owner = %lock.owner, acquired, "table lock attempt");
        Ok(acquired)
    }

    async fn release(&self, lock: &LockIdentity) -> LockResult<bool> {
        Ok(match &self.rows {
            Rows::Local(state) => state.delete_lock(&lock.key, &lock.owner)?,
            Rows::Shared(store) => store.delete_lock(&lock.key, &lock.owner).await?,
        })
    }

    async fn is_locked(&self, lock: &LockIdentity) -> LockResult<bool> {
        let cutoff = Utc::now() - self.stale_after;
        let row = match &self.rows {
            Rows::Local(state) => state.get_lock(&lock.key)?,
            Rows::Shared(store) => store.get_lock(&lock.key).await?,
        };
        Ok(row.is_some_and(|row| row.locked_at >= cutoff))
    }
}
