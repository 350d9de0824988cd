//! Metrics collector — turns backlog rows into a [`MetricsSnapshot`].
//!
//! The [`MetricsCollector`] trait is the seam the orchestrator depends on.
//! [`StoreCollector`] reads the `jobs` and `processes` tables of the
//! jobscale state store.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use jobscale_state::{JobStatus, MetricsSnapshot, StateStore};

use crate::error::MetricsResult;

/// Processes without a heartbeat inside this window are not counted.
pub const DEFAULT_HEARTBEAT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Window over which finished jobs count towards throughput.
const THROUGHPUT_WINDOW: chrono::Duration = chrono::Duration::seconds(60);

/// Source of backlog snapshots.
///
/// A failure to query the store is a hard error for the run that asked.
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    async fn collect(&self) -> MetricsResult<MetricsSnapshot>;
}

/// Collects metrics from the jobscale state store.
#[derive(Debug, Clone)]
pub struct StoreCollector {
    state: StateStore,
    /// Restrict job counts to these queues. `None` means every queue.
    queues: Option<BTreeSet<String>>,
    heartbeat_window: Duration,
}

impl StoreCollector {
    /// Create a collector over every queue in the store.
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            queues: None,
            heartbeat_window: DEFAULT_HEARTBEAT_WINDOW,
        }
    }

    /// Only count jobs in the given queues.
    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = Some(queues.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_heartbeat_window(mut self, window: Duration) -> Self {
        self.heartbeat_window = window;
        self
    }

    fn includes(&self, queue: &str) -> bool {
        self.queues.as_ref().is_none_or(|q| q.contains(queue))
    }

    /// Build a snapshot as observed at `now`.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> MetricsResult<MetricsSnapshot> {
        let jobs = self.state.list_jobs()?;
        let processes = self.state.list_processes()?;

        let mut snapshot = MetricsSnapshot::empty(now);
        let mut per_queue: BTreeMap<String, u64> = BTreeMap::new();
        let mut oldest_ready: Option<DateTime<Utc>> = None;
        let throughput_since = now - THROUGHPUT_WINDOW;

        for job in jobs.iter().filter(|j| self.includes(&j.queue)) {
            match job.status {
                JobStatus::Ready => {
                    snapshot.queue_depth += 1;
                    *per_queue.entry(job.queue.clone()).or_default() += 1;
                    oldest_ready = Some(match oldest_ready {
                        Some(t) => t.min(job.ready_at),
                        None => job.ready_at,
                    });
                }
                JobStatus::Claimed => snapshot.claimed_jobs += 1,
                JobStatus::Blocked => snapshot.blocked_jobs += 1,
                JobStatus::Failed => snapshot.failed_jobs += 1,
                JobStatus::Finished => {
                    if job.finished_at.is_some_and(|t| t > throughput_since) {
                        snapshot.jobs_completed_per_minute += 1;
                    }
                }
            }
        }

        snapshot.oldest_job_age_seconds = oldest_ready
            .map(|t| ((now - t).num_milliseconds() as f64 / 1000.0).max(0.0))
            .unwrap_or(0.0);
        snapshot.per_queue_depth = per_queue;

        let heartbeat_cutoff = now
            - chrono::Duration::from_std(self.heartbeat_window)
                .unwrap_or(chrono::Duration::seconds(300));
        snapshot.active_workers = processes
            .iter()
            .filter(|p| p.last_heartbeat_at > heartbeat_cutoff)
            .count() as u64;

        debug!(
            queue_depth = snapshot.queue_depth,
            oldest_job_age_seconds = snapshot.oldest_job_age_seconds,
            claimed = snapshot.claimed_jobs,
            active_workers = snapshot.active_workers,
            "backlog metrics collected"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl MetricsCollector for StoreCollector {
    async fn collect(&self) -> MetricsResult<MetricsSnapshot> {
        self.snapshot_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobscale_state::{JobRecord, ProcessRecord};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn secs_ago(secs: i64) -> DateTime<Utc> {
        now() - chrono::Duration::seconds(secs)
    }

    fn test_state() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn put_job(state: &StateStore, id: &str, queue: &str, status: JobStatus, ready_secs_ago: i64) {
        state
            .put_job(&JobRecord {
                id: id.to_string(),
                queue: queue.to_string(),
                status,
                ready_at: secs_ago(ready_secs_ago),
                finished_at: (status == JobStatus::Finished).then(|| secs_ago(ready_secs_ago)),
            })
            .unwrap();
    }

    fn put_process(state: &StateStore, id: &str, heartbeat_secs_ago: i64) {
        state
            .put_process(&ProcessRecord {
                id: id.to_string(),
                kind: "worker".to_string(),
                hostname: "host-a".to_string(),
                last_heartbeat_at: secs_ago(heartbeat_secs_ago),
            })
            .unwrap();
    }

    #[test]
    fn empty_backlog_is_idle() {
        let snap = StoreCollector::new(test_state()).snapshot_at(now()).unwrap();
        assert_eq!(snap.queue_depth, 0);
        assert_eq!(snap.oldest_job_age_seconds, 0.0);
        assert!(snap.is_idle());
        assert_eq!(snap.collected_at, now());
    }

    #[test]
    fn counts_jobs_by_status() {
        let state = test_state();
        put_job(&state, "r1", "default", JobStatus::Ready, 30);
        put_job(&state, "r2", "default", JobStatus::Ready, 90);
        put_job(&state, "c1", "default", JobStatus::Claimed, 10);
        put_job(&state, "b1", "default", JobStatus::Blocked, 10);
        put_job(&state, "f1", "default", JobStatus::Failed, 10);
        put_job(&state, "done-recent", "default", JobStatus::Finished, 20);
        put_job(&state, "done-old", "default", JobStatus::Finished, 600);

        let snap = StoreCollector::new(state).snapshot_at(now()).unwrap();
        assert_eq!(snap.queue_depth, 2);
        assert_eq!(snap.oldest_job_age_seconds, 90.0);
        assert_eq!(snap.claimed_jobs, 1);
        assert_eq!(snap.blocked_jobs, 1);
        assert_eq!(snap.failed_jobs, 1);
        assert_eq!(snap.jobs_completed_per_minute, 1);
        assert!(!snap.is_idle());
    }

    #[test]
    fn per_queue_breakdown_and_filter() {
        let state = test_state();
        put_job(&state, "a1", "critical", JobStatus::Ready, 5);
        put_job(&state, "a2", "critical", JobStatus::Ready, 5);
        put_job(&state, "b1", "mailers", JobStatus::Ready, 500);

        let all = StoreCollector::new(state.clone()).snapshot_at(now()).unwrap();
        assert_eq!(all.queue_depth, 3);
        assert_eq!(all.per_queue_depth.get("critical"), Some(&2));
        assert_eq!(all.per_queue_depth.get("mailers"), Some(&1));

        let critical = StoreCollector::new(state)
            .with_queues(["critical"])
            .snapshot_at(now())
            .unwrap();
        assert_eq!(critical.queue_depth, 2);
        assert_eq!(critical.oldest_job_age_seconds, 5.0);
        assert!(!critical.per_queue_depth.contains_key("mailers"));
    }

    #[test]
    fn active_workers_respect_heartbeat_window() {
        let state = test_state();
        put_process(&state, "p1", 10);
        put_process(&state, "p2", 299);
        put_process(&state, "p3", 301);

        let snap = StoreCollector::new(state.clone()).snapshot_at(now()).unwrap();
        assert_eq!(snap.active_workers, 2);

        let tight = StoreCollector::new(state)
            .with_heartbeat_window(Duration::from_secs(60))
            .snapshot_at(now())
            .unwrap();
        assert_eq!(tight.active_workers, 1);
    }

    #[tokio::test]
    async fn collect_uses_current_time() {
        let state = test_state();
        put_job(&state, "r1", "default", JobStatus::Ready, 0);
        let before = Utc::now();

        let snap = StoreCollector::new(state).collect().await.unwrap();
        assert_eq!(snap.queue_depth, 1);
        assert!(snap.collected_at >= before);
    }
}
