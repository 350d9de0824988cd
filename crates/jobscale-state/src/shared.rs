//! SharedStore — coordination state in Postgres, visible to every process.
//!
//! The redb [`StateStore`](crate::StateStore) holds an exclusive file lock,
//! so only one process can use it at a time. Deployments that run several
//! jobscale processes (a `run` loop plus ad-hoc `scale` calls, or replicas on
//! different hosts) keep lock rows, cooldowns and scale events here instead.
//!
//! ```text
//! {prefix}autoscaler_locks      lock_key PK, lock_id, locked_at, locked_owner
//! {prefix}autoscaler_cooldowns  worker_name PK, last_scale_up_at, last_scale_down_at
//! {prefix}autoscaler_events     id, worker_name, action, from/to, reason, metrics, dry_run, created_at
//! ```

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::PgPool;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Prefix shared with the Solid Queue tables the Postgres collector reads.
pub const DEFAULT_TABLE_PREFIX: &str = "solid_queue_";

static TABLE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*$").expect("table prefix pattern is valid")
});

/// Whether `prefix` is safe to splice into SQL as part of a table name.
pub fn is_valid_table_prefix(prefix: &str) -> bool {
    TABLE_PREFIX.is_match(prefix)
}

macro_rules! db_err {
    () => {
        |e: sqlx::Error| StateError::Database(e.to_string())
    };
}

type LockRow = (String, i64, DateTime<Utc>, String);
type EventRow = (String, String, i64, i64, String, Option<String>, bool, DateTime<Utc>);

/// Postgres-backed locks, cooldowns and scale events.
#[derive(Debug, Clone)]
pub struct SharedStore {
    pool: PgPool,
    prefix: String,
}

impl SharedStore {
    /// Wrap `pool` without touching the database.
    pub fn new(pool: PgPool, table_prefix: &str) -> StateResult<Self> {
        if !is_valid_table_prefix(table_prefix) {
            return Err(StateError::InvalidTablePrefix(table_prefix.to_string()));
        }
        Ok(Self {
            pool,
            prefix: table_prefix.to_string(),
        })
    }

    /// Wrap `pool` and create the tables if they are missing.
    pub async fn connect(pool: PgPool, table_prefix: &str) -> StateResult<Self> {
        let store = Self::new(pool, table_prefix)?;
        store.ensure_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn locks_table(&self) -> String {
        format!("{}autoscaler_locks", self.prefix)
    }

    pub fn cooldowns_table(&self) -> String {
        format!("{}autoscaler_cooldowns", self.prefix)
    }

    pub fn events_table(&self) -> String {
        format!("{}autoscaler_events", self.prefix)
    }

    async fn ensure_tables(&self) -> StateResult<()> {
        let locks = self.locks_table();
        let cooldowns = self.cooldowns_table();
        let events = self.events_table();
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {locks} (\
                    lock_key TEXT PRIMARY KEY, \
                    lock_id BIGINT NOT NULL, \
                    locked_at TIMESTAMPTZ NOT NULL, \
                    locked_owner TEXT NOT NULL)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {cooldowns} (\
                    worker_name TEXT PRIMARY KEY, \
                    last_scale_up_at TIMESTAMPTZ, \
                    last_scale_down_at TIMESTAMPTZ)"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {events} (\
                    id BIGSERIAL PRIMARY KEY, \
                    worker_name TEXT NOT NULL, \
                    action TEXT NOT NULL, \
                    from_workers BIGINT NOT NULL, \
                    to_workers BIGINT NOT NULL, \
                    reason TEXT NOT NULL, \
                    metrics TEXT, \
                    dry_run BOOLEAN NOT NULL, \
                    created_at TIMESTAMPTZ NOT NULL)"
            ),
            format!("CREATE INDEX IF NOT EXISTS {events}_created_at_idx ON {events} (created_at)"),
        ];
        for sql in &statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(db_err!())?;
        }
        debug!(prefix = %self.prefix, "shared state tables ready");
        Ok(())
    }

    // ── Locks ──────────────────────────────────────────────────────

    /// Purge rows locked before `stale_before`, then insert `record` unless a
    /// row for its key exists. Both run in one transaction; the primary key
    /// makes the insert the arbiter between racing processes.
    pub async fn insert_lock_if_absent(
        &self,
        record: &LockRecord,
        stale_before: DateTime<Utc>,
    ) -> StateResult<bool> {
        let table = self.locks_table();
        let mut tx = self.pool.begin().await.map_err(db_err!())?;

        let reaped = sqlx::query(&format!("DELETE FROM {table} WHERE locked_at < $1"))
            .bind(stale_before)
            .execute(&mut *tx)
            .await
            .map_err(db_err!())?
            .rows_affected();
        if reaped > 0 {
            debug!(reaped, "reaped stale lock rows");
        }

        let inserted = sqlx::query(&format!(
            "INSERT INTO {table} (lock_key, lock_id, locked_at, locked_owner) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (lock_key) DO NOTHING"
        ))
        .bind(&record.lock_key)
        .bind(record.lock_id)
        .bind(record.locked_at)
        .bind(&record.locked_owner)
        .execute(&mut *tx)
        .await
        .map_err(db_err!())?
        .rows_affected()
            == 1;

        tx.commit().await.map_err(db_err!())?;
        Ok(inserted)
    }

    pub async fn get_lock(&self, lock_key: &str) -> StateResult<Option<LockRecord>> {
        let row: Option<LockRow> = sqlx::query_as(&format!(
            "SELECT lock_key, lock_id, locked_at, locked_owner FROM {} WHERE lock_key = $1",
            self.locks_table()
        ))
        .bind(lock_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err!())?;
        Ok(row.map(|(lock_key, lock_id, locked_at, locked_owner)| LockRecord {
            lock_key,
            lock_id,
            locked_at,
            locked_owner,
        }))
    }

    /// Delete the row for `lock_key` only if `owner` wrote it.
    pub async fn delete_lock(&self, lock_key: &str, owner: &str) -> StateResult<bool> {
        let removed = sqlx::query(&format!(
            "DELETE FROM {} WHERE lock_key = $1 AND locked_owner = $2",
            self.locks_table()
        ))
        .bind(lock_key)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(db_err!())?
        .rows_affected()
            > 0;
        debug!(%lock_key, %owner, removed, "shared lock row released");
        Ok(removed)
    }

    // ── Cooldowns ──────────────────────────────────────────────────

    pub async fn get_cooldown(&self, worker_name: &str) -> StateResult<Option<CooldownRecord>> {
        let row: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = sqlx::query_as(&format!(
            "SELECT last_scale_up_at, last_scale_down_at FROM {} WHERE worker_name = $1",
            self.cooldowns_table()
        ))
        .bind(worker_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err!())?;
        Ok(row.map(|(last_scale_up_at, last_scale_down_at)| CooldownRecord {
            worker_name: worker_name.to_string(),
            last_scale_up_at,
            last_scale_down_at,
        }))
    }

    /// Upsert a cooldown record. Existing timestamps are only ever moved
    /// forward, so two processes writing at once keep the later of each.
    pub async fn put_cooldown(&self, record: &CooldownRecord) -> StateResult<()> {
        let table = self.cooldowns_table();
        sqlx::query(&format!(
            "INSERT INTO {table} AS t (worker_name, last_scale_up_at, last_scale_down_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (worker_name) DO UPDATE SET \
               last_scale_up_at = GREATEST(t.last_scale_up_at, EXCLUDED.last_scale_up_at), \
               last_scale_down_at = GREATEST(t.last_scale_down_at, EXCLUDED.last_scale_down_at)"
        ))
        .bind(&record.worker_name)
        .bind(record.last_scale_up_at)
        .bind(record.last_scale_down_at)
        .execute(&self.pool)
        .await
        .map_err(db_err!())?;
        Ok(())
    }

    pub async fn delete_cooldown(&self, worker_name: &str) -> StateResult<bool> {
        let removed = sqlx::query(&format!(
            "DELETE FROM {} WHERE worker_name = $1",
            self.cooldowns_table()
        ))
        .bind(worker_name)
        .execute(&self.pool)
        .await
        .map_err(db_err!())?
        .rows_affected();
        Ok(removed > 0)
    }

    pub async fn clear_cooldowns(&self) -> StateResult<u32> {
        let removed = sqlx::query(&format!("DELETE FROM {}", self.cooldowns_table()))
            .execute(&self.pool)
            .await
            .map_err(db_err!())?
            .rows_affected();
        Ok(u32::try_from(removed).unwrap_or(u32::MAX))
    }

    // ── Scale events ───────────────────────────────────────────────

    pub async fn append_event(&self, event: &ScaleEvent) -> StateResult<()> {
        let metrics = event
            .metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        sqlx::query(&format!(
            "INSERT INTO {} (worker_name, action, from_workers, to_workers, reason, metrics, dry_run, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.events_table()
        ))
        .bind(&event.worker_name)
        .bind(event.action.as_str())
        .bind(i64::from(event.from_workers))
        .bind(i64::from(event.to_workers))
        .bind(&event.reason)
        .bind(metrics)
        .bind(event.dry_run)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err!())?;
        debug!(worker = %event.worker_name, action = event.action.as_str(), "scale event recorded");
        Ok(())
    }

    /// Most recent events first, optionally for one worker group.
    pub async fn list_events(
        &self,
        worker_name: Option<&str>,
        limit: usize,
    ) -> StateResult<Vec<ScaleEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT worker_name, action, from_workers, to_workers, reason, metrics, dry_run, created_at \
             FROM {} WHERE ($1::text IS NULL OR worker_name = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2",
            self.events_table()
        ))
        .bind(worker_name)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err!())?;
        rows.into_iter().map(event_from_row).collect()
    }

    pub async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> StateResult<u32> {
        let removed = sqlx::query(&format!(
            "DELETE FROM {} WHERE created_at < $1",
            self.events_table()
        ))
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err!())?
        .rows_affected();
        debug!(deleted = removed, %cutoff, "scale events pruned");
        Ok(u32::try_from(removed).unwrap_or(u32::MAX))
    }
}

fn event_from_row(row: EventRow) -> StateResult<ScaleEvent> {
    let (worker_name, action, from_workers, to_workers, reason, metrics, dry_run, created_at) = row;
    let count = |n: i64| {
        u32::try_from(n).map_err(|_| StateError::Deserialize(format!("worker count {n} out of range")))
    };
    Ok(ScaleEvent {
        worker_name,
        action: action.parse()?,
        from_workers: count(from_workers)?,
        to_workers: count(to_workers)?,
        reason,
        metrics: metrics
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StateError::Deserialize(e.to_string()))?,
        dry_run,
        created_at,
    })
}
