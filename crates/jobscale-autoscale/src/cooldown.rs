//! Per worker-group cooldowns.
//!
//! Timestamps live in memory and, when a [`CooldownStore`] is attached and
//! the group has `persist_cooldowns` on, in the store as well. Reads merge
//! both and keep the later timestamp. The redb store carries cooldowns
//! across restarts; the shared Postgres store also makes them visible to
//! peer processes. A store that errors (or was never provisioned) degrades
//! to memory-only.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use jobscale_state::{CooldownRecord, SharedStore, StateResult, StateStore};

use crate::config::WorkerConfig;
use crate::decision::ScaleAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "scale_up",
            Direction::Down => "scale_down",
        }
    }

    pub fn of(action: ScaleAction) -> Option<Direction> {
        match action {
            ScaleAction::ScaleUp => Some(Direction::Up),
            ScaleAction::ScaleDown => Some(Direction::Down),
            ScaleAction::NoChange => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last scale timestamps for one worker group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CooldownState {
    pub last_scale_up_at: Option<DateTime<Utc>>,
    pub last_scale_down_at: Option<DateTime<Utc>>,
}

impl CooldownState {
    pub fn last(&self, direction: Direction) -> Option<DateTime<Utc>> {
        match direction {
            Direction::Up => self.last_scale_up_at,
            Direction::Down => self.last_scale_down_at,
        }
    }

    /// Field-wise latest of `self` and `other`.
    pub fn merge(self, other: CooldownState) -> CooldownState {
        CooldownState {
            last_scale_up_at: self.last_scale_up_at.max(other.last_scale_up_at),
            last_scale_down_at: self.last_scale_down_at.max(other.last_scale_down_at),
        }
    }

    fn set(&mut self, direction: Direction, at: DateTime<Utc>) {
        match direction {
            Direction::Up => self.last_scale_up_at = Some(at),
            Direction::Down => self.last_scale_down_at = Some(at),
        }
    }
}

/// Durable backing for cooldown timestamps.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn load(&self, worker: &str) -> StateResult<Option<CooldownState>>;
    async fn save(&self, worker: &str, state: &CooldownState) -> StateResult<()>;
    async fn remove(&self, worker: &str) -> StateResult<()>;
    async fn clear(&self) -> StateResult<()>;
}

fn from_record(record: CooldownRecord) -> CooldownState {
    CooldownState {
        last_scale_up_at: record.last_scale_up_at,
        last_scale_down_at: record.last_scale_down_at,
    }
}

fn to_record(worker: &str, state: &CooldownState) -> CooldownRecord {
    CooldownRecord {
        worker_name: worker.to_string(),
        last_scale_up_at: state.last_scale_up_at,
        last_scale_down_at: state.last_scale_down_at,
    }
}

#[async_trait]
impl CooldownStore for StateStore {
    async fn load(&self, worker: &str) -> StateResult<Option<CooldownState>> {
        Ok(self.get_cooldown(worker)?.map(from_record))
    }

    async fn save(&self, worker: &str, state: &CooldownState) -> StateResult<()> {
        self.put_cooldown(&to_record(worker, state))
    }

    async fn remove(&self, worker: &str) -> StateResult<()> {
        self.delete_cooldown(worker).map(|_| ())
    }

    async fn clear(&self) -> StateResult<()> {
        self.clear_cooldowns().map(|_| ())
    }
}

#[async_trait]
impl CooldownStore for SharedStore {
    async fn load(&self, worker: &str) -> StateResult<Option<CooldownState>> {
        Ok(self.get_cooldown(worker).await?.map(from_record))
    }

    async fn save(&self, worker: &str, state: &CooldownState) -> StateResult<()> {
        self.put_cooldown(&to_record(worker, state)).await
    }

    async fn remove(&self, worker: &str) -> StateResult<()> {
        self.delete_cooldown(worker).await.map(|_| ())
    }

    async fn clear(&self) -> StateResult<()> {
        self.clear_cooldowns().await.map(|_| ())
    }
}

#[derive(Default)]
pub struct CooldownTracker {
    memory: Mutex<HashMap<String, CooldownState>>,
    store: Option<Arc<dyn CooldownStore>>,
}

impl fmt::Debug for CooldownTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CooldownTracker")
            .field("groups", &self.memory().len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl CooldownTracker {
    /// Memory-only tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<dyn CooldownStore>) -> Self {
        Self {
            memory: Mutex::default(),
            store: Some(store),
        }
    }

    fn memory(&self) -> std::sync::MutexGuard<'_, HashMap<String, CooldownState>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn stored(&self, worker: &str) -> Option<CooldownState> {
        let store = self.store.as_ref()?;
        match store.load(worker).await {
            Ok(state) => state,
            Err(e) => {
                debug!(worker, error = %e, "cooldown store unavailable, using memory");
                None
            }
        }
    }

    fn remembered(&self, worker: &str) -> CooldownState {
        self.memory().get(worker).copied().unwrap_or_default()
    }

    /// Merged memory and store timestamps for `worker`.
    pub async fn state(&self, worker: &str) -> CooldownState {
        let memory = self.remembered(worker);
        match self.stored(worker).await {
            Some(stored) => memory.merge(stored),
            None => memory,
        }
    }

    async fn state_for(&self, config: &WorkerConfig) -> CooldownState {
        if config.persist_cooldowns {
            self.state(&config.name).await
        } else {
            self.remembered(&config.name)
        }
    }

    pub async fn is_active(&self, config: &WorkerConfig, direction: Direction) -> bool {
        self.is_active_at(config, direction, Utc::now()).await
    }

    pub async fn is_active_at(&self, config: &WorkerConfig, direction: Direction, now: DateTime<Utc>) -> bool {
        !self.remaining_at(config, direction, now).await.is_zero()
    }

    pub async fn remaining(&self, config: &WorkerConfig, direction: Direction) -> Duration {
        self.remaining_at(config, direction, Utc::now()).await
    }

    /// Time left before `direction` may scale again; zero when free.
    pub async fn remaining_at(&self, config: &WorkerConfig, direction: Direction, now: DateTime<Utc>) -> Duration {
        let Some(last) = self.state_for(config).await.last(direction) else {
            return Duration::ZERO;
        };
        let cooldown = config.effective_cooldown(direction);
        // A timestamp from the future counts as "just now".
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        cooldown.saturating_sub(elapsed)
    }

    pub async fn record(&self, config: &WorkerConfig, direction: Direction) {
        self.record_at(config, direction, Utc::now()).await;
    }

    /// Record a committed scale action in memory, then in the store.
    pub async fn record_at(&self, config: &WorkerConfig, direction: Direction, at: DateTime<Utc>) {
        let state = {
            let mut memory = self.memory();
            let entry = memory.entry(config.name.clone()).or_default();
            entry.set(direction, at);
            *entry
        };
        debug!(worker = %config.name, %direction, %at, "cooldown recorded");

        if !config.persist_cooldowns {
            return;
        }
        if let Some(store) = &self.store {
            let merged = self.stored(&config.name).await.map_or(state, |s| s.merge(state));
            if let Err(e) = store.save(&config.name, &merged).await {
                debug!(worker = %config.name, error = %e, "failed to persist cooldown");
            }
        }
    }

    pub async fn reset(&self, worker: &str) {
        self.memory().remove(worker);
        if let Some(store) = &self.store
            && let Err(e) = store.remove(worker).await
        {
            debug!(worker, error = %e, "failed to reset persisted cooldown");
        }
    }

    pub async fn reset_all(&self) {
        self.memory().clear();
        if let Some(store) = &self.store
            && let Err(e) = store.clear().await
        {
            debug!(error = %e, "failed to reset persisted cooldowns");
        }
    }
}
