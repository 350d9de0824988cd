//! StateStore — redb-backed state persistence for jobscale.
//!
//! Provides typed operations over backlog jobs, process heartbeats, locks,
//! cooldowns, and scale events. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Tie-breaker for events recorded within the same nanosecond.
    event_seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// redb locks the file for the lifetime of the store, so a second
    /// process opening the same path gets [`StateError::InUse`]. State that
    /// several processes must see lives in [`SharedStore`](crate::SharedStore).
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| match e {
            redb::DatabaseError::DatabaseAlreadyOpen => {
                StateError::InUse(path.display().to_string())
            }
            other => StateError::Open(other.to_string()),
        })?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            event_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(PROCESSES).map_err(map_err!(Table))?;
        txn.open_table(LOCKS).map_err(map_err!(Table))?;
        txn.open_table(COOLDOWNS).map_err(map_err!(Table))?;
        txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or update a backlog job.
    pub fn put_job(&self, job: &JobRecord) -> StateResult<()> {
        let value = serde_json::to_vec(job).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            table
                .insert(job.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a job by id.
    pub fn get_job(&self, id: &str) -> StateResult<Option<JobRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let job: JobRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// List every job in the backlog.
    pub fn list_jobs(&self) -> StateResult<Vec<JobRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: JobRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(job);
        }
        Ok(results)
    }

    /// Delete a job by id. Returns true if it existed.
    pub fn delete_job(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Processes ──────────────────────────────────────────────────

    /// Insert or update a process heartbeat.
    pub fn put_process(&self, process: &ProcessRecord) -> StateResult<()> {
        let value = serde_json::to_vec(process).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROCESSES).map_err(map_err!(Table))?;
            table
                .insert(process.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all known processes.
    pub fn list_processes(&self) -> StateResult<Vec<ProcessRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROCESSES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let process: ProcessRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(process);
        }
        Ok(results)
    }

    /// Delete a process by id. Returns true if it existed.
    pub fn delete_process(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PROCESSES).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Locks ──────────────────────────────────────────────────────

    /// Insert a lock row unless one already exists for its key.
    ///
    /// Rows locked before `stale_before` are purged first, in the same write
    /// transaction. redb serializes write transactions, so the
    /// check-then-insert cannot interleave with another writer. Returns true
    /// if the row was inserted.
    pub fn insert_lock_if_absent(
        &self,
        record: &LockRecord,
        stale_before: DateTime<Utc>,
    ) -> StateResult<bool> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;

            let stale: Vec<String> = table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, value) = entry.ok()?;
                    let held: LockRecord = serde_json::from_slice(value.value()).ok()?;
                    (held.locked_at < stale_before).then(|| key.value().to_string())
                })
                .collect();
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
                debug!(lock_key = %key, "reaped stale lock");
            }

            let exists = table
                .get(record.lock_key.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if !exists {
                table
                    .insert(record.lock_key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            inserted = !exists;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(inserted)
    }

    /// Get the lock row for a key, if any.
    pub fn get_lock(&self, lock_key: &str) -> StateResult<Option<LockRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
        match table.get(lock_key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: LockRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Delete the lock row for a key if `owner` holds it. Returns true if a
    /// row was removed.
    pub fn delete_lock(&self, lock_key: &str, owner: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let owned = match table.get(lock_key).map_err(map_err!(Read))? {
                Some(guard) => {
                    let record: LockRecord = serde_json::from_slice(guard.value())
                        .map_err(map_err!(Deserialize))?;
                    record.locked_owner == owner
                }
                None => false,
            };
            if owned {
                table.remove(lock_key).map_err(map_err!(Write))?;
            }
            removed = owned;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%lock_key, %owner, removed, "lock row released");
        Ok(removed)
    }

    // ── Cooldowns ──────────────────────────────────────────────────

    /// Insert or update the cooldown record for a worker group.
    pub fn put_cooldown(&self, record: &CooldownRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COOLDOWNS).map_err(map_err!(Table))?;
            table
                .insert(record.worker_name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the cooldown record for a worker group.
    pub fn get_cooldown(&self, worker_name: &str) -> StateResult<Option<CooldownRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COOLDOWNS).map_err(map_err!(Table))?;
        match table.get(worker_name).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: CooldownRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Delete the cooldown record for a worker group. Returns true if it existed.
    pub fn delete_cooldown(&self, worker_name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(COOLDOWNS).map_err(map_err!(Table))?;
            existed = table.remove(worker_name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Delete every cooldown record. Returns number deleted.
    pub fn clear_cooldowns(&self) -> StateResult<u32> {
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(COOLDOWNS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    Some(key.value().to_string())
                })
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(COOLDOWNS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Scale events ───────────────────────────────────────────────

    /// Append a scale event to the audit log.
    pub fn append_event(&self, event: &ScaleEvent) -> StateResult<()> {
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed);
        let key = format!(
            "{}:{}:{seq:08}",
            ScaleEvent::time_key(event.created_at),
            event.worker_name
        );
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, action = event.action.as_str(), "scale event recorded");
        Ok(())
    }

    /// List the most recent events, newest first, optionally for one worker group.
    pub fn list_events(
        &self,
        worker_name: Option<&str>,
        limit: usize,
    ) -> StateResult<Vec<ScaleEvent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: ScaleEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if worker_name.is_none_or(|name| event.worker_name == name) {
                results.push(event);
            }
        }
        Ok(results)
    }

    /// Delete events created before `cutoff`. Returns number deleted.
    pub fn prune_events_before(&self, cutoff: DateTime<Utc>) -> StateResult<u32> {
        let cutoff_key = ScaleEvent::time_key(cutoff);
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    Some(key.value().to_string())
                })
                .take_while(|key| key.as_str() < cutoff_key.as_str())
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deleted = count, %cutoff, "scale events pruned");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn test_job(id: &str, queue: &str, status: JobStatus) -> JobRecord {
        JobRecord {
            id: id.to_string(),
            queue: queue.to_string(),
            status,
            ready_at: at(0),
            finished_at: None,
        }
    }

    fn test_lock(key: &str, owner: &str, locked_at: DateTime<Utc>) -> LockRecord {
        LockRecord {
            lock_key: key.to_string(),
            lock_id: 42,
            locked_at,
            locked_owner: owner.to_string(),
        }
    }

    fn test_event(worker: &str, action: EventAction, created_at: DateTime<Utc>) -> ScaleEvent {
        ScaleEvent {
            worker_name: worker.to_string(),
            action,
            from_workers: 1,
            to_workers: 2,
            reason: "queue_depth=150 >= 100".to_string(),
            metrics: None,
            dry_run: false,
            created_at,
        }
    }

    // ── Jobs ───────────────────────────────────────────────────────

    #[test]
    fn job_put_get_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let job = test_job("j-1", "default", JobStatus::Ready);

        store.put_job(&job).unwrap();
        assert_eq!(store.get_job("j-1").unwrap(), Some(job));

        assert!(store.delete_job("j-1").unwrap());
        assert!(!store.delete_job("j-1").unwrap());
        assert!(store.get_job("j-1").unwrap().is_none());
    }

    #[test]
    fn job_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut job = test_job("j-1", "default", JobStatus::Ready);
        store.put_job(&job).unwrap();

        job.status = JobStatus::Claimed;
        store.put_job(&job).unwrap();

        let jobs = store.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Claimed);
    }

    #[test]
    fn process_put_and_list() {
        let store = StateStore::open_in_memory().unwrap();
        for id in ["p-1", "p-2"] {
            store
                .put_process(&ProcessRecord {
                    id: id.to_string(),
                    kind: "worker".to_string(),
                    hostname: "host-a".to_string(),
                    last_heartbeat_at: at(0),
                })
                .unwrap();
        }
        assert_eq!(store.list_processes().unwrap().len(), 2);
        assert!(store.delete_process("p-1").unwrap());
        assert_eq!(store.list_processes().unwrap().len(), 1);
    }

    // ── Locks ──────────────────────────────────────────────────────

    #[test]
    fn lock_insert_is_exclusive_per_key() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.insert_lock_if_absent(&test_lock("k", "a", at(0)), at(-300)).unwrap());
        assert!(!store.insert_lock_if_absent(&test_lock("k", "b", at(1)), at(-299)).unwrap());
        assert!(store.insert_lock_if_absent(&test_lock("other", "b", at(1)), at(-299)).unwrap());

        assert_eq!(store.get_lock("k").unwrap().unwrap().locked_owner, "a");
    }

    #[test]
    fn lock_delete_requires_matching_owner() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_lock_if_absent(&test_lock("k", "a", at(0)), at(-300)).unwrap();

        assert!(!store.delete_lock("k", "b").unwrap());
        assert!(store.get_lock("k").unwrap().is_some());

        assert!(store.delete_lock("k", "a").unwrap());
        assert!(store.get_lock("k").unwrap().is_none());
    }

    #[test]
    fn stale_lock_is_reaped_before_insert() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_lock_if_absent(&test_lock("k", "crashed", at(0)), at(-300)).unwrap();

        // 301 seconds later the row is older than the stale cutoff.
        let now = at(301);
        let acquired = store
            .insert_lock_if_absent(&test_lock("k", "b", now), now - Duration::seconds(300))
            .unwrap();

        assert!(acquired);
        assert_eq!(store.get_lock("k").unwrap().unwrap().locked_owner, "b");
    }

    // ── Cooldowns ──────────────────────────────────────────────────

    #[test]
    fn cooldown_put_get_clear() {
        let store = StateStore::open_in_memory().unwrap();
        let record = CooldownRecord {
            worker_name: "critical".to_string(),
            last_scale_up_at: Some(at(10)),
            last_scale_down_at: None,
        };
        store.put_cooldown(&record).unwrap();
        store
            .put_cooldown(&CooldownRecord {
                worker_name: "default".to_string(),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.get_cooldown("critical").unwrap(), Some(record));
        assert!(store.delete_cooldown("critical").unwrap());
        assert_eq!(store.clear_cooldowns().unwrap(), 1);
        assert!(store.get_cooldown("default").unwrap().is_none());
    }

    // ── Events ─────────────────────────────────────────────────────

    #[test]
    fn events_list_newest_first_with_filter() {
        let store = StateStore::open_in_memory().unwrap();
        store.append_event(&test_event("a", EventAction::ScaleUp, at(1))).unwrap();
        store.append_event(&test_event("b", EventAction::Skipped, at(2))).unwrap();
        store.append_event(&test_event("a", EventAction::ScaleDown, at(3))).unwrap();

        let all = store.list_events(None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].action, EventAction::ScaleDown);

        let only_a = store.list_events(Some("a"), 10).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|e| e.worker_name == "a"));

        assert_eq!(store.list_events(None, 1).unwrap().len(), 1);
    }

    #[test]
    fn events_same_instant_do_not_collide() {
        let store = StateStore::open_in_memory().unwrap();
        store.append_event(&test_event("a", EventAction::NoChange, at(1))).unwrap();
        store.append_event(&test_event("a", EventAction::NoChange, at(1))).unwrap();
        assert_eq!(store.list_events(Some("a"), 10).unwrap().len(), 2);
    }

    #[test]
    fn prune_removes_only_older_events() {
        let store = StateStore::open_in_memory().unwrap();
        for secs in [1, 2, 3, 4] {
            store.append_event(&test_event("a", EventAction::ScaleUp, at(secs))).unwrap();
        }

        let deleted = store.prune_events_before(at(3)).unwrap();
        assert_eq!(deleted, 2);

        let remaining = store.list_events(None, 10).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|e| e.created_at >= at(3)));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .put_cooldown(&CooldownRecord {
                    worker_name: "default".to_string(),
                    last_scale_up_at: Some(at(5)),
                    last_scale_down_at: None,
                })
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let record = store.get_cooldown("default").unwrap().unwrap();
        assert_eq!(record.last_scale_up_at, Some(at(5)));
    }

    #[test]
    fn second_open_reports_file_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let _held = StateStore::open(&db_path).unwrap();
        let err = StateStore::open(&db_path).unwrap_err();
        assert!(matches!(err, StateError::InUse(ref path) if path.ends_with("test.redb")));
    }

    #[test]
    fn event_actions_parse_from_their_names() {
        for action in [
            EventAction::ScaleUp,
            EventAction::ScaleDown,
            EventAction::NoChange,
            EventAction::Skipped,
            EventAction::Error,
        ] {
            assert_eq!(action.as_str().parse::<EventAction>().unwrap(), action);
        }
        assert!("scaled".parse::<EventAction>().is_err());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_jobs().unwrap().is_empty());
        assert!(store.list_processes().unwrap().is_empty());
        assert!(store.list_events(None, 10).unwrap().is_empty());
        assert!(store.get_lock("nope").unwrap().is_none());
        assert!(!store.delete_lock("nope", "me").unwrap());
        assert_eq!(store.prune_events_before(at(0)).unwrap(), 0);
    }

    #[test]
    fn snapshot_idle_predicate() {
        let mut snap = MetricsSnapshot::empty(at(0));
        assert!(snap.is_idle());
        snap.claimed_jobs = 1;
        assert!(!snap.is_idle());
        snap.claimed_jobs = 0;
        snap.queue_depth = 3;
        assert!(!snap.is_idle());
    }
}
