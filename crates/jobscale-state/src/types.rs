//! Domain types for the jobscale state store.
//!
//! These types represent the backlog rows the store-backed collector reads,
//! the coordination records the lock and cooldown layers write, and the
//! immutable metrics snapshot every scaling decision is computed from. All
//! types are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of an independently configured worker group.
pub type WorkerName = String;

// ── Metrics ───────────────────────────────────────────────────────

/// Point-in-time view of a job backlog.
///
/// Created fresh for every orchestration run and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Jobs ready to run but not yet claimed.
    pub queue_depth: u64,
    /// Age in seconds of the oldest ready-but-unclaimed job.
    pub oldest_job_age_seconds: f64,
    /// Jobs finished during the last minute.
    pub jobs_completed_per_minute: u64,
    /// Jobs currently claimed by a worker.
    pub claimed_jobs: u64,
    /// Jobs that failed and await a retry or discard.
    pub failed_jobs: u64,
    /// Jobs waiting on a concurrency limit.
    pub blocked_jobs: u64,
    /// Worker processes with a recent heartbeat.
    pub active_workers: u64,
    /// Ready job count per queue name.
    pub per_queue_depth: BTreeMap<String, u64>,
    pub collected_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// An empty backlog observed at `collected_at`.
    pub fn empty(collected_at: DateTime<Utc>) -> Self {
        Self {
            queue_depth: 0,
            oldest_job_age_seconds: 0.0,
            jobs_completed_per_minute: 0,
            claimed_jobs: 0,
            failed_jobs: 0,
            blocked_jobs: 0,
            active_workers: 0,
            per_queue_depth: BTreeMap::new(),
            collected_at,
        }
    }

    /// Nothing is waiting and nothing is running.
    pub fn is_idle(&self) -> bool {
        self.queue_depth == 0 && self.claimed_jobs == 0
    }
}

// ── Backlog ───────────────────────────────────────────────────────

/// Lifecycle status of a job in the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ready,
    Claimed,
    Blocked,
    Failed,
    Finished,
}

/// A unit of work tracked by the backlog store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub queue: String,
    pub status: JobStatus,
    /// When the job became ready to run.
    pub ready_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A worker process reporting heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
    pub id: String,
    /// Process role, e.g. "worker" or "dispatcher".
    pub kind: String,
    pub hostname: String,
    pub last_heartbeat_at: DateTime<Utc>,
}

// ── Coordination ──────────────────────────────────────────────────

/// A held table-based lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockRecord {
    pub lock_key: String,
    /// 31-bit id derived from the key.
    pub lock_id: i64,
    pub locked_at: DateTime<Utc>,
    /// `{hostname}:{pid}:{instance}` of the holder.
    pub locked_owner: String,
}

/// Persisted scale timestamps for one worker group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CooldownRecord {
    pub worker_name: WorkerName,
    pub last_scale_up_at: Option<DateTime<Utc>>,
    pub last_scale_down_at: Option<DateTime<Utc>>,
}

// ── Audit ─────────────────────────────────────────────────────────

/// Outcome category of an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    ScaleUp,
    ScaleDown,
    NoChange,
    Skipped,
    Error,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::ScaleUp => "scale_up",
            EventAction::ScaleDown => "scale_down",
            EventAction::NoChange => "no_change",
            EventAction::Skipped => "skipped",
            EventAction::Error => "error",
        }
    }
}

impl std::str::FromStr for EventAction {
    type Err = crate::error::StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scale_up" => Ok(EventAction::ScaleUp),
            "scale_down" => Ok(EventAction::ScaleDown),
            "no_change" => Ok(EventAction::NoChange),
            "skipped" => Ok(EventAction::Skipped),
            "error" => Ok(EventAction::Error),
            other => Err(crate::error::StateError::Deserialize(format!(
                "unknown event action {other:?}"
            ))),
        }
    }
}

/// One append-only audit row per orchestration outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleEvent {
    pub worker_name: WorkerName,
    pub action: EventAction,
    pub from_workers: u32,
    pub to_workers: u32,
    pub reason: String,
    /// Denormalized copy of the snapshot the decision was based on.
    pub metrics: Option<MetricsSnapshot>,
    pub dry_run: bool,
    pub created_at: DateTime<Utc>,
}

impl ScaleEvent {
    /// Prefix of the events-table key; zero-padded so keys sort by time.
    pub fn time_key(at: DateTime<Utc>) -> String {
        format!("{:020}", at.timestamp_nanos_opt().unwrap_or_default().max(0))
    }
}
