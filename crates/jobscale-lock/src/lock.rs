//! AdvisoryLock — the lock handle the orchestrator holds.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::{LockBackend, LockStrategy};
use crate::error::{LockError, LockResult};
use crate::key::LockIdentity;

/// Default time `acquire_wait` keeps retrying.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A named cross-process lock.
///
/// Two `AdvisoryLock` values on the same key never both succeed in
/// `try_lock` until one of them releases, even inside one process: each
/// value carries its own owner identity.
pub struct AdvisoryLock {
    identity: LockIdentity,
    strategy: Arc<dyn LockStrategy>,
    held: Arc<AtomicBool>,
    timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for AdvisoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisoryLock")
            .field("identity", &self.identity)
            .field("strategy", &self.strategy.name())
            .field("held", &self.is_held())
            .finish()
    }
}

impl AdvisoryLock {
    pub fn new(key: impl Into<String>, backend: &LockBackend) -> Self {
        Self::with_strategy(key, backend.strategy())
    }

    pub(crate) fn with_strategy(key: impl Into<String>, strategy: Arc<dyn LockStrategy>) -> Self {
        Self {
            identity: LockIdentity::new(key),
            strategy,
            held: Arc::new(AtomicBool::new(false)),
            timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How long `acquire_wait` keeps trying before giving up.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn key(&self) -> &str {
        &self.identity.key
    }

    pub fn lock_id(&self) -> i64 {
        self.identity.id
    }

    pub fn owner(&self) -> &str {
        &self.identity.owner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether this handle currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(false)` when another owner holds it. Errors are reserved
    /// for the backend itself failing.
    pub async fn try_lock(&self) -> LockResult<bool> {
        if self.is_held() {
            return Ok(true);
        }
        let acquired = self.strategy.try_acquire(&self.identity).await?;
        if acquired {
            self.held.store(true, Ordering::Release);
            debug!(
                key = %self.identity.key,
                lock_id = self.identity.id,
                strategy = self.strategy.name(),
                "lock acquired"
            );
        }
        Ok(acquired)
    }

    /// Take the lock or fail with [`LockError::Unavailable`].
    pub async fn acquire(&self) -> LockResult<()> {
        if self.try_lock().await? {
            Ok(())
        } else {
            Err(LockError::Unavailable {
                key: self.identity.key.clone(),
            })
        }
    }

    /// Keep trying until the lock is taken or the timeout passes.
    pub async fn acquire_wait(&self) -> LockResult<()> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        loop {
            if self.try_lock().await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    key: self.identity.key.clone(),
                    waited: now - started,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Release the lock if this handle holds it.
    ///
    /// The handle stays held when the backend fails to release, so a later
    /// `release` retries instead of leaving an orphaned row behind.
    pub async fn release(&self) -> LockResult<bool> {
        if !self.is_held() {
            return Ok(false);
        }
        let released = self.strategy.release(&self.identity).await?;
        self.held.store(false, Ordering::Release);
        debug!(key = %self.identity.key, released, "lock released");
        Ok(released)
    }

    /// Whether anyone, this handle included, holds the lock.
    pub async fn is_locked(&self) -> LockResult<bool> {
        if self.is_held() {
            return Ok(true);
        }
        self.strategy.is_locked(&self.identity).await
    }

    /// Run `f` while holding the lock.
    ///
    /// Fails with [`LockError::Unavailable`] without running `f` if the lock
    /// is taken. The lock is released after `f` completes whatever it
    /// returns, and before a panic in `f` is resumed; a failed release is
    /// logged, not reported. If the returned future is dropped mid-flight
    /// the release is handed to a background task.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> LockResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await?;
        let mut guard = ReleaseOnDrop { lock: self, armed: true };

        let outcome = AssertUnwindSafe(async move { f().await }).catch_unwind().await;
        if let Err(e) = self.release().await {
            warn!(key = %self.identity.key, error = %e, "failed to release lock");
        }
        guard.armed = false;

        match outcome {
            Ok(output) => Ok(output),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Release on a spawned task; used where `.await` is not possible.
    fn release_in_background(&self) {
        let strategy = self.strategy.clone();
        let identity = self.identity.clone();
        let held = self.held.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match strategy.release(&identity).await {
                        Ok(released) => {
                            held.store(false, Ordering::Release);
                            debug!(key = %identity.key, released, "lock released after cancellation");
                        }
                        Err(e) => {
                            warn!(key = %identity.key, error = %e, "failed to release lock after cancellation")
                        }
                    }
                });
            }
            Err(_) => warn!(
                key = %self.identity.key,
                "lock dropped outside a runtime; it stays held until it goes stale"
            ),
        }
    }
}

/// Hands the release to a background task if a `with_lock` body is dropped.
struct ReleaseOnDrop<'a> {
    lock: &'a AdvisoryLock,
    armed: bool,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed && self.lock.is_held() {
            self.lock.release_in_background();
        }
    }
}
