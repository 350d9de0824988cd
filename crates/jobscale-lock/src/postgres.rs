//! Postgres session-level advisory lock.
//!
//! The connection that took the lock is checked out of the pool and kept
//! until release, because Postgres ties advisory locks to the session. If
//! the process dies the session ends and the server drops the lock.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::LockStrategy;
use crate::error::LockResult;
use crate::key::LockIdentity;

pub struct PgAdvisoryLock {
    pool: PgPool,
    session: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            session: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LockStrategy for PgAdvisoryLock {
    fn name(&self) -> &'static str {
        "postgres_advisory"
    }

    async fn try_acquire(&self, lock: &LockIdentity) -> LockResult<bool> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(true);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(lock.id)
            .fetch_one(&mut *conn)
            .await?;
        debug!(key = %lock.key, lock_id = lock.id, acquired, "pg_try_advisory_lock");

        if acquired {
            *session = Some(conn);
        }
        Ok(acquired)
    }

    async fn release(&self, lock: &LockIdentity) -> LockResult<bool> {
        let Some(mut conn) = self.session.lock().await.take() else {
            return Ok(false);
        };

        match sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(lock.id)
            .fetch_one(&mut *conn)
            .await
        {
            Ok(released) => Ok(released),
            Err(e) => {
                // Never hand a session that may still hold the lock back to
                // the pool; closing it makes the server drop the lock.
                warn!(key = %lock.key, error = %e, "advisory unlock failed, closing session");
                let _ = conn.detach().close().await;
                Err(e.into())
            }
        }
    }

    async fn is_locked(&self, lock: &LockIdentity) -> LockResult<bool> {
        let locked: bool = sqlx::query_scalar(
            "SELECT EXISTS (\
                SELECT 1 FROM pg_locks \
                WHERE locktype = 'advisory' AND classid = 0 \
                  AND objid = ($1::bigint)::oid AND objsubid = 1 AND granted)",
        )
        .bind(lock.id)
        .fetch_one(&self.pool)
        .await?;
        Ok(locked)
    }
}
