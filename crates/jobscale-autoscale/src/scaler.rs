//! Scaler — one lock-guarded orchestration run for one worker group.
//!
//! ```text
//! disabled? ─▶ skip
//! try_lock  ─▶ (held elsewhere) skip
//! collect metrics ─▶ read current workers ─▶ decide
//! no_change ─▶ success
//! cooldown active (unless scaling up from zero) ─▶ skip
//! re-read current workers; on drift re-check bounds and rebase
//! clamp ─▶ adapter.scale ─▶ record cooldown ─▶ record event
//! release lock (also on panic or cancellation)
//! ```
//!
//! Nothing inside a run is spawned; concurrency only comes from separate
//! runs racing on the same worker group, which the lock serializes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use jobscale_adapters::InfrastructureAdapter;
use jobscale_lock::{AdvisoryLock, LockBackend, LockError};
use jobscale_metrics::{MetricsCollector, MetricsResult};
use jobscale_state::{EventAction, MetricsSnapshot, ScaleEvent};

use crate::config::{ConfigError, WorkerConfig};
use crate::cooldown::{CooldownState, CooldownTracker, Direction};
use crate::decision::{Decision, decide};
use crate::error::ScaleError;
use crate::events::{EventSink, append_best_effort};

/// Outcome of one orchestration run.
#[derive(Debug)]
pub struct ScaleResult {
    worker: String,
    success: bool,
    decision: Option<Decision>,
    metrics: Option<MetricsSnapshot>,
    error: Option<ScaleError>,
    skipped_reason: Option<String>,
    dry_run: bool,
    executed_at: DateTime<Utc>,
}

impl ScaleResult {
    fn completed(worker: &WorkerConfig, decision: Decision, metrics: MetricsSnapshot) -> Self {
        Self {
            worker: worker.name.clone(),
            success: true,
            decision: Some(decision),
            metrics: Some(metrics),
            error: None,
            skipped_reason: None,
            dry_run: worker.dry_run,
            executed_at: Utc::now(),
        }
    }

    fn skipped(
        worker: &WorkerConfig,
        reason: impl Into<String>,
        decision: Option<Decision>,
        metrics: Option<MetricsSnapshot>,
    ) -> Self {
        Self {
            worker: worker.name.clone(),
            success: true,
            decision,
            metrics,
            error: None,
            skipped_reason: Some(reason.into()),
            dry_run: worker.dry_run,
            executed_at: Utc::now(),
        }
    }

    fn failed(
        worker: &WorkerConfig,
        error: ScaleError,
        decision: Option<Decision>,
        metrics: Option<MetricsSnapshot>,
    ) -> Self {
        Self {
            worker: worker.name.clone(),
            success: false,
            decision,
            metrics,
            error: Some(error),
            skipped_reason: None,
            dry_run: worker.dry_run,
            executed_at: Utc::now(),
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Succeeded, was not skipped, and changed the worker count.
    pub fn is_scaled(&self) -> bool {
        self.success
            && self.skipped_reason.is_none()
            && self.decision.as_ref().is_some_and(Decision::is_change)
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped_reason.is_some()
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    pub fn metrics(&self) -> Option<&MetricsSnapshot> {
        self.metrics.as_ref()
    }

    pub fn error(&self) -> Option<&ScaleError> {
        self.error.as_ref()
    }

    pub fn skipped_reason(&self) -> Option<&str> {
        self.skipped_reason.as_deref()
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn executed_at(&self) -> DateTime<Utc> {
        self.executed_at
    }

    /// One line suitable for logs and terminal output.
    pub fn summary(&self) -> String {
        let dry = if self.dry_run { " [dry run]" } else { "" };
        if let Some(e) = &self.error {
            format!("{}: error: {e}", self.worker)
        } else if let Some(reason) = &self.skipped_reason {
            format!("{}: skipped: {reason}", self.worker)
        } else if let Some(d) = &self.decision {
            format!("{}: {d}{dry}", self.worker)
        } else {
            format!("{}: no decision", self.worker)
        }
    }
}

/// Orchestrates decide-and-apply for one worker group.
pub struct Scaler {
    config: WorkerConfig,
    collector: Arc<dyn MetricsCollector>,
    adapter: Arc<dyn InfrastructureAdapter>,
    lock: AdvisoryLock,
    cooldowns: Arc<CooldownTracker>,
    events: Option<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for Scaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scaler")
            .field("worker", &self.config.name)
            .field("adapter", &self.adapter.name())
            .field("lock", &self.lock)
            .finish()
    }
}

impl Scaler {
    /// Validates `config`; an invalid configuration is never run.
    pub fn new(
        config: WorkerConfig,
        collector: Arc<dyn MetricsCollector>,
        adapter: Arc<dyn InfrastructureAdapter>,
        lock_backend: &LockBackend,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let lock = AdvisoryLock::new(config.lock_key.clone(), lock_backend)
            .with_timeout(config.lock_timeout());
        Ok(Self {
            config,
            collector,
            adapter,
            lock,
            cooldowns: Arc::new(CooldownTracker::new()),
            events: None,
        })
    }

    /// Share a tracker across scalers or back it with the state store.
    pub fn with_cooldowns(mut self, cooldowns: Arc<CooldownTracker>) -> Self {
        self.cooldowns = cooldowns;
        self
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock = self.lock.with_poll_interval(interval);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn InfrastructureAdapter> {
        &self.adapter
    }

    pub async fn metrics(&self) -> MetricsResult<MetricsSnapshot> {
        self.collector.collect().await
    }

    pub async fn current_workers(&self) -> Result<u32, ScaleError> {
        Ok(self.adapter.current_workers().await?)
    }

    pub async fn cooldown_state(&self) -> CooldownState {
        self.cooldowns.state(&self.config.name).await
    }

    pub async fn cooldown_remaining(&self, direction: Direction) -> Duration {
        self.cooldowns.remaining(&self.config, direction).await
    }

    pub async fn reset_cooldowns(&self) {
        self.cooldowns.reset(&self.config.name).await;
    }

    /// Run once without waiting for the lock.
    ///
    /// Never fails: lock contention becomes a skip, and metrics or adapter
    /// failures become an error result.
    pub async fn run(&self) -> ScaleResult {
        if !self.config.enabled {
            return ScaleResult::skipped(&self.config, "autoscaler disabled", None, None);
        }

        match self.lock.with_lock(|| self.execute()).await {
            Ok(result) => result,
            Err(LockError::Unavailable { .. }) => {
                debug!(worker = %self.config.name, key = %self.lock.key(), "lock held elsewhere, skipping");
                ScaleResult::skipped(
                    &self.config,
                    "could not acquire lock (another process is scaling)",
                    None,
                    None,
                )
            }
            Err(e) => {
                warn!(worker = %self.config.name, error = %e, "lock check failed, skipping");
                ScaleResult::skipped(&self.config, format!("lock unavailable: {e}"), None, None)
            }
        }
    }

    /// Run once, waiting up to `lock_timeout_seconds` for the lock.
    pub async fn run_wait(&self) -> Result<ScaleResult, LockError> {
        if !self.config.enabled {
            return Ok(ScaleResult::skipped(&self.config, "autoscaler disabled", None, None));
        }

        self.lock.acquire_wait().await?;
        // Already held, so `with_lock` only adds the release guard.
        self.lock.with_lock(|| self.execute()).await
    }

    /// The critical section. Caller holds the lock.
    async fn execute(&self) -> ScaleResult {
        let config = &self.config;

        let metrics = match self.collector.collect().await {
            Ok(m) => m,
            Err(e) => return self.fail(e.into(), None, None, 0).await,
        };

        let current = match self.adapter.current_workers().await {
            Ok(n) => n,
            Err(e) => return self.fail(e.into(), None, Some(metrics), 0).await,
        };

        let decision = decide(&metrics, current, config);
        debug!(
            worker = %config.name,
            queue_depth = metrics.queue_depth,
            latency = metrics.oldest_job_age_seconds,
            current,
            action = %decision.action(),
            to = decision.to(),
            reason = decision.reason(),
            "decision"
        );

        let Some(direction) = Direction::of(decision.action()) else {
            if config.record_all_events {
                self.record(EventAction::NoChange, &decision, decision.reason(), Some(&metrics))
                    .await;
            }
            return ScaleResult::completed(config, decision, metrics);
        };

        let bypass = decision.is_from_zero();
        if self.cooldowns.is_active(config, direction).await {
            if bypass {
                info!(worker = %config.name, "scaling up from zero, bypassing cooldown");
            } else {
                return self.skip_cooling_down(direction, decision, metrics).await;
            }
        }

        // Another process may have scaled between our first read and now.
        let fresh = match self.adapter.current_workers().await {
            Ok(n) => n,
            Err(e) => return self.fail(e.into(), Some(decision), Some(metrics), current).await,
        };
        let decision = if fresh == decision.from() {
            decision
        } else {
            match self.reverify(direction, decision, fresh) {
                Ok(d) => d,
                Err((reason, decision)) => {
                    info!(worker = %config.name, current, fresh, %reason, "skipping after drift");
                    self.record(EventAction::Skipped, &decision, &reason, Some(&metrics))
                        .await;
                    return ScaleResult::skipped(config, reason, Some(decision), Some(metrics));
                }
            }
        };
        if bypass && fresh > 0 && self.cooldowns.is_active(config, direction).await {
            return self.skip_cooling_down(direction, decision, metrics).await;
        }

        let target = config.clamp(decision.to());
        if target == decision.from() {
            let reason = format!("target {} clamps to current {target}", decision.to());
            return ScaleResult::skipped(config, reason, Some(decision), Some(metrics));
        }
        let decision = if target == decision.to() {
            decision
        } else {
            decision.with_target(target)
        };

        let confirmed = match self.adapter.scale(target).await {
            Ok(n) => n,
            Err(e) => {
                let from = decision.from();
                return self.fail(e.into(), Some(decision), Some(metrics), from).await;
            }
        };
        if confirmed != target {
            warn!(worker = %config.name, target, confirmed, "platform confirmed a different worker count");
        }

        self.cooldowns.record(config, direction).await;
        self.record(decision.action().into(), &decision, decision.reason(), Some(&metrics))
            .await;

        info!(
            worker = %config.name,
            adapter = self.adapter.name(),
            action = %decision.action(),
            from = decision.from(),
            to = decision.to(),
            reason = decision.reason(),
            dry_run = config.dry_run,
            "scaled worker group"
        );
        ScaleResult::completed(config, decision, metrics)
    }

    /// Re-check a decision against a drifted worker count.
    ///
    /// Returns the rebased decision, or the skip reason.
    fn reverify(
        &self,
        direction: Direction,
        decision: Decision,
        fresh: u32,
    ) -> Result<Decision, (String, Decision)> {
        let config = &self.config;
        match direction {
            Direction::Up if fresh >= config.max_workers => {
                return Err((
                    format!("current workers changed to {fresh}, already at max_workers ({})", config.max_workers),
                    decision,
                ));
            }
            Direction::Down if fresh <= config.min_workers => {
                return Err((
                    format!("current workers changed to {fresh}, already at min_workers ({})", config.min_workers),
                    decision,
                ));
            }
            _ => {}
        }

        let to = i64::from(fresh) + decision.delta();
        let to = config.clamp(u32::try_from(to.max(0)).unwrap_or(u32::MAX));
        let still_moving = match direction {
            Direction::Up => to > fresh,
            Direction::Down => to < fresh,
        };
        if !still_moving {
            return Err((
                format!("current workers changed to {fresh}, target {to} no longer a {direction}"),
                decision,
            ));
        }
        Ok(decision.rebased(fresh, to))
    }

    async fn skip_cooling_down(
        &self,
        direction: Direction,
        decision: Decision,
        metrics: MetricsSnapshot,
    ) -> ScaleResult {
        let remaining = self.cooldowns.remaining(&self.config, direction).await;
        let reason = format!("cooldown active for {direction} ({}s remaining)", remaining.as_secs());
        debug!(worker = %self.config.name, %reason, "skipping");
        self.record(EventAction::Skipped, &decision, &reason, Some(&metrics))
            .await;
        ScaleResult::skipped(&self.config, reason, Some(decision), Some(metrics))
    }

    async fn fail(
        &self,
        error: ScaleError,
        decision: Option<Decision>,
        metrics: Option<MetricsSnapshot>,
        current: u32,
    ) -> ScaleResult {
        error!(worker = %self.config.name, error = %error, "scale run failed");
        let event = ScaleEvent {
            worker_name: self.config.name.clone(),
            action: EventAction::Error,
            from_workers: decision.as_ref().map_or(current, Decision::from),
            to_workers: decision.as_ref().map_or(current, Decision::to),
            reason: error.to_string(),
            metrics: metrics.clone(),
            dry_run: self.config.dry_run,
            created_at: Utc::now(),
        };
        self.append(&event).await;
        ScaleResult::failed(&self.config, error, decision, metrics)
    }

    async fn record(
        &self,
        action: EventAction,
        decision: &Decision,
        reason: &str,
        metrics: Option<&MetricsSnapshot>,
    ) {
        self.append(&ScaleEvent {
            worker_name: self.config.name.clone(),
            action,
            from_workers: decision.from(),
            to_workers: decision.to(),
            reason: reason.to_string(),
            metrics: metrics.cloned(),
            dry_run: self.config.dry_run,
            created_at: Utc::now(),
        })
        .await;
    }

    async fn append(&self, event: &ScaleEvent) {
        if !self.config.record_events {
            return;
        }
        if let Some(sink) = &self.events {
            append_best_effort(sink, event).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use jobscale_adapters::{AdapterError, AdapterResult};
    use jobscale_metrics::MetricsError;
    use jobscale_state::StateStore;

    pub(crate) struct FakeAdapter {
        workers: Mutex<u32>,
        /// Answers for upcoming `current_workers` calls before falling back
        /// to the live count.
        script: Mutex<VecDeque<u32>>,
        scaled: Mutex<Vec<u32>>,
        fail_scale: bool,
    }

    impl FakeAdapter {
        pub(crate) fn new(workers: u32) -> Self {
            Self {
                workers: Mutex::new(workers),
                script: Mutex::new(VecDeque::new()),
                scaled: Mutex::new(Vec::new()),
                fail_scale: false,
            }
        }

        fn reading(self, reads: &[u32]) -> Self {
            *self.script.lock().unwrap() = reads.iter().copied().collect();
            self
        }

        fn failing(mut self) -> Self {
            self.fail_scale = true;
            self
        }

        pub(crate) fn scaled(&self) -> Vec<u32> {
            self.scaled.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InfrastructureAdapter for FakeAdapter {
        fn name(&self) -> &str {
            "fake"
        }

        fn configuration_errors(&self) -> Vec<String> {
            Vec::new()
        }

        async fn current_workers(&self) -> AdapterResult<u32> {
            if let Some(n) = self.script.lock().unwrap().pop_front() {
                return Ok(n);
            }
            Ok(*self.workers.lock().unwrap())
        }

        async fn scale(&self, quantity: u32) -> AdapterResult<u32> {
            if self.fail_scale {
                return Err(AdapterError::Http {
                    provider: "fake",
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            *self.workers.lock().unwrap() = quantity;
            self.scaled.lock().unwrap().push(quantity);
            Ok(quantity)
        }
    }

    pub(crate) struct FakeCollector {
        snapshot: Option<MetricsSnapshot>,
    }

    impl FakeCollector {
        pub(crate) fn backlog(depth: u64, age: f64) -> Self {
            let mut snapshot = MetricsSnapshot::empty(Utc::now());
            snapshot.queue_depth = depth;
            snapshot.oldest_job_age_seconds = age;
            snapshot.claimed_jobs = 1;
            Self {
                snapshot: Some(snapshot),
            }
        }

        fn broken() -> Self {
            Self { snapshot: None }
        }
    }

    #[async_trait]
    impl MetricsCollector for FakeCollector {
        async fn collect(&self) -> MetricsResult<MetricsSnapshot> {
            self.snapshot
                .clone()
                .ok_or_else(|| MetricsError::Configuration("backlog store offline".to_string()))
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl EventSink for BrokenSink {
        async fn append(&self, _: &ScaleEvent) -> anyhow::Result<()> {
            anyhow::bail!("scale_events table missing")
        }
    }

    struct Harness {
        state: StateStore,
        backend: LockBackend,
        adapter: Arc<FakeAdapter>,
        cooldowns: Arc<CooldownTracker>,
    }

    impl Harness {
        fn new(adapter: FakeAdapter) -> Self {
            let state = StateStore::open_in_memory().unwrap();
            Self {
                backend: LockBackend::table(state.clone()),
                cooldowns: Arc::new(CooldownTracker::with_store(Arc::new(state.clone()))),
                adapter: Arc::new(adapter),
                state,
            }
        }

        fn scaler(&self, config: WorkerConfig, collector: FakeCollector) -> Scaler {
            Scaler::new(config, Arc::new(collector), self.adapter.clone(), &self.backend)
                .unwrap()
                .with_cooldowns(self.cooldowns.clone())
                .with_events(Arc::new(self.state.clone()))
                .with_lock_poll_interval(Duration::from_millis(10))
        }

        fn events(&self) -> Vec<ScaleEvent> {
            self.state.list_events(None, 100).unwrap()
        }
    }

    #[tokio::test]
    async fn scales_up_and_records_cooldown_and_event() {
        let h = Harness::new(FakeAdapter::new(2));
        let config = WorkerConfig {
            scale_up_increment: 2,
            ..WorkerConfig::default()
        };
        let result = h.scaler(config.clone(), FakeCollector::backlog(150, 50.0)).run().await;

        assert!(result.is_success() && result.is_scaled(), "{}", result.summary());
        assert_eq!(h.adapter.scaled(), vec![4]);
        assert!(h.cooldowns.is_active(&config, Direction::Up).await);

        let events = h.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::ScaleUp);
        assert_eq!((events[0].from_workers, events[0].to_workers), (2, 4));
        assert!(events[0].metrics.is_some());
    }

    #[tokio::test]
    async fn lock_is_released_after_a_run() {
        let h = Harness::new(FakeAdapter::new(2));
        let scaler = h.scaler(WorkerConfig::default(), FakeCollector::backlog(150, 50.0));
        scaler.run().await;

        let next = AdvisoryLock::new("jobscale_default", &h.backend);
        assert!(next.try_lock().await.unwrap());
    }

    #[tokio::test]
    async fn no_change_is_success_and_unrecorded_by_default() {
        let h = Harness::new(FakeAdapter::new(3));
        let result = h
            .scaler(WorkerConfig::default(), FakeCollector::backlog(50, 60.0))
            .run()
            .await;

        assert!(result.is_success());
        assert!(!result.is_scaled() && !result.is_skipped());
        assert!(h.adapter.scaled().is_empty());
        assert!(h.events().is_empty());
    }

    #[tokio::test]
    async fn no_change_is_recorded_when_asked() {
        let h = Harness::new(FakeAdapter::new(3));
        let config = WorkerConfig {
            record_all_events: true,
            ..WorkerConfig::default()
        };
        h.scaler(config, FakeCollector::backlog(50, 60.0)).run().await;

        let events = h.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::NoChange);
    }

    #[tokio::test]
    async fn disabled_group_is_skipped() {
        let h = Harness::new(FakeAdapter::new(1));
        let config = WorkerConfig {
            enabled: false,
            ..WorkerConfig::default()
        };
        let result = h.scaler(config, FakeCollector::backlog(500, 500.0)).run().await;
        assert_eq!(result.skipped_reason(), Some("autoscaler disabled"));
        assert!(h.adapter.scaled().is_empty());
    }

    #[tokio::test]
    async fn contended_lock_skips() {
        let h = Harness::new(FakeAdapter::new(1));
        let holder = AdvisoryLock::new("jobscale_default", &h.backend);
        holder.acquire().await.unwrap();

        let result = h
            .scaler(WorkerConfig::default(), FakeCollector::backlog(500, 500.0))
            .run()
            .await;
        assert!(result.is_skipped());
        assert!(result.skipped_reason().unwrap().contains("lock"));
        assert!(h.adapter.scaled().is_empty());
    }

    #[tokio::test]
    async fn active_cooldown_skips_with_remaining_time() {
        let h = Harness::new(FakeAdapter::new(2));
        let config = WorkerConfig::default();
        h.cooldowns.record(&config, Direction::Up).await;

        let result = h.scaler(config, FakeCollector::backlog(150, 50.0)).run().await;
        assert!(result.is_skipped());
        assert!(result.skipped_reason().unwrap().starts_with("cooldown active for scale_up"));
        assert!(h.adapter.scaled().is_empty());
        assert_eq!(h.events()[0].action, EventAction::Skipped);
    }

    #[tokio::test]
    async fn scale_up_from_zero_bypasses_cooldown() {
        let h = Harness::new(FakeAdapter::new(0));
        let config = WorkerConfig::default();
        let earlier = Utc::now() - chrono::Duration::seconds(5);
        h.cooldowns.record_at(&config, Direction::Up, earlier).await;

        let result = h.scaler(config.clone(), FakeCollector::backlog(1, 2.0)).run().await;

        assert!(result.is_scaled(), "{}", result.summary());
        assert_eq!(h.adapter.scaled(), vec![1]);
        let last = h.cooldowns.state("default").await.last_scale_up_at.unwrap();
        assert!(last > earlier);
    }

    #[tokio::test]
    async fn drift_to_max_aborts_scale_up() {
        let h = Harness::new(FakeAdapter::new(10).reading(&[8, 10]));
        let result = h
            .scaler(WorkerConfig::default(), FakeCollector::backlog(500, 10.0))
            .run()
            .await;

        assert!(result.is_skipped());
        assert!(result.skipped_reason().unwrap().contains("max_workers (10)"));
        assert!(h.adapter.scaled().is_empty());
    }

    #[tokio::test]
    async fn drift_to_min_aborts_scale_down() {
        let h = Harness::new(FakeAdapter::new(1).reading(&[4, 1]));
        let result = h
            .scaler(WorkerConfig::default(), FakeCollector::backlog(2, 1.0))
            .run()
            .await;

        assert!(result.is_skipped());
        assert!(result.skipped_reason().unwrap().contains("min_workers (1)"));
        assert!(h.adapter.scaled().is_empty());
    }

    #[tokio::test]
    async fn drift_inside_bounds_rebases_the_step() {
        let h = Harness::new(FakeAdapter::new(3).reading(&[2, 3]));
        let config = WorkerConfig {
            scale_up_increment: 2,
            ..WorkerConfig::default()
        };
        let result = h.scaler(config, FakeCollector::backlog(150, 50.0)).run().await;

        assert!(result.is_scaled());
        assert_eq!(h.adapter.scaled(), vec![5]);
        let decision = result.decision().unwrap();
        assert_eq!((decision.from(), decision.to()), (3, 5));
    }

    #[tokio::test]
    async fn adapter_failure_becomes_error_result() {
        let h = Harness::new(FakeAdapter::new(2).failing());
        let result = h
            .scaler(WorkerConfig::default(), FakeCollector::backlog(150, 50.0))
            .run()
            .await;

        assert!(!result.is_success());
        assert!(matches!(result.error(), Some(ScaleError::Adapter(_))));
        assert!(result.decision().is_some());
        assert_eq!(h.events()[0].action, EventAction::Error);
        assert!(!h.cooldowns.is_active(&WorkerConfig::default(), Direction::Up).await);

        let next = AdvisoryLock::new("jobscale_default", &h.backend);
        assert!(next.try_lock().await.unwrap());
    }

    /// Adapter that blows up or stalls inside the critical section.
    struct UnrulyAdapter {
        stall: bool,
    }

    #[async_trait]
    impl InfrastructureAdapter for UnrulyAdapter {
        fn name(&self) -> &str {
            "unruly"
        }

        fn configuration_errors(&self) -> Vec<String> {
            Vec::new()
        }

        async fn current_workers(&self) -> AdapterResult<u32> {
            Ok(2)
        }

        async fn scale(&self, _: u32) -> AdapterResult<u32> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            panic!("platform client bug");
        }
    }

    fn unruly_scaler(h: &Harness, stall: bool) -> Scaler {
        Scaler::new(
            WorkerConfig::default(),
            Arc::new(FakeCollector::backlog(150, 50.0)),
            Arc::new(UnrulyAdapter { stall }),
            &h.backend,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn lock_is_released_when_the_adapter_panics() {
        let h = Harness::new(FakeAdapter::new(2));
        let scaler = unruly_scaler(&h, false);

        let joined = tokio::spawn(async move { scaler.run().await }).await;
        assert!(joined.unwrap_err().is_panic());

        let next = AdvisoryLock::new("jobscale_default", &h.backend);
        assert!(next.try_lock().await.unwrap());
    }

    #[tokio::test]
    async fn lock_is_released_when_a_run_is_abandoned() {
        let h = Harness::new(FakeAdapter::new(2));
        let scaler = unruly_scaler(&h, true);

        let abandoned = tokio::time::timeout(Duration::from_millis(20), scaler.run()).await;
        assert!(abandoned.is_err());

        let next = AdvisoryLock::new("jobscale_default", &h.backend).with_timeout(Duration::from_secs(2));
        next.acquire_wait().await.unwrap();
    }

    #[tokio::test]
    async fn metrics_failure_becomes_error_result() {
        let h = Harness::new(FakeAdapter::new(2));
        let result = h.scaler(WorkerConfig::default(), FakeCollector::broken()).run().await;

        assert!(!result.is_success());
        assert!(matches!(result.error(), Some(ScaleError::Metrics(_))));
        assert!(result.summary().contains("backlog store offline"));
    }

    #[tokio::test]
    async fn audit_failure_does_not_change_the_outcome() {
        let h = Harness::new(FakeAdapter::new(2));
        let scaler = Scaler::new(
            WorkerConfig::default(),
            Arc::new(FakeCollector::backlog(150, 50.0)),
            h.adapter.clone(),
            &h.backend,
        )
        .unwrap()
        .with_events(Arc::new(BrokenSink));

        let result = scaler.run().await;
        assert!(result.is_scaled());
        assert_eq!(h.adapter.scaled(), vec![3]);
    }

    #[tokio::test]
    async fn run_wait_times_out_when_lock_is_held() {
        let h = Harness::new(FakeAdapter::new(2));
        let holder = AdvisoryLock::new("jobscale_default", &h.backend);
        holder.acquire().await.unwrap();

        let config = WorkerConfig {
            lock_timeout_seconds: 1,
            ..WorkerConfig::default()
        };
        let err = h
            .scaler(config, FakeCollector::backlog(150, 50.0))
            .run_wait()
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[tokio::test]
    async fn run_wait_proceeds_once_lock_is_free() {
        let h = Harness::new(FakeAdapter::new(2));
        let result = h
            .scaler(WorkerConfig::default(), FakeCollector::backlog(150, 50.0))
            .run_wait()
            .await
            .unwrap();
        assert!(result.is_scaled());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let h = Harness::new(FakeAdapter::new(0));
        let config = WorkerConfig {
            min_workers: 5,
            max_workers: 1,
            ..WorkerConfig::default()
        };
        let err = Scaler::new(config, Arc::new(FakeCollector::broken()), h.adapter.clone(), &h.backend)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
