//! MySQL named lock (`GET_LOCK` with a zero timeout).
//!
//! Like Postgres advisory locks, MySQL named locks belong to the session, so
//! the acquiring connection is held until release.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, MySqlPool};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::LockStrategy;
use crate::error::LockResult;
use crate::key::LockIdentity;

pub struct MySqlNamedLock {
    pool: MySqlPool,
    session: Mutex<Option<PoolConnection<MySql>>>,
}

impl MySqlNamedLock {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            session: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LockStrategy for MySqlNamedLock {
    fn name(&self) -> &'static str {
        "mysql_named"
    }

    async fn try_acquire(&self, lock: &LockIdentity) -> LockResult<bool> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(true);
        }

        let mut conn = self.pool.acquire().await?;
        // GET_LOCK returns NULL on error; treat that as not acquired.
        let result: i64 = sqlx::query_scalar("SELECT COALESCE(GET_LOCK(?, 0), 0)")
            .bind(&lock.key)
            .fetch_one(&mut *conn)
            .await?;
        let acquired = result == 1;
        debug!(key = %lock.key, acquired, "GET_LOCK");

        if acquired {
            *session = Some(conn);
        }
        Ok(acquired)
    }

    async fn release(&self, lock: &LockIdentity) -> LockResult<bool> {
        let Some(mut conn) = self.session.lock().await.take() else {
            return Ok(false);
        };

        match sqlx::query_scalar::<_, i64>("SELECT COALESCE(RELEASE_LOCK(?), 0)")
            .bind(&lock.key)
            .fetch_one(&mut *conn)
            .await
        {
            Ok(result) => Ok(result == 1),
            Err(e) => {
                warn!(key = %lock.key, error = %e, "RELEASE_LOCK failed, closing session");
                let _ = conn.detach().close().await;
                Err(e.into())
            }
        }
    }

    async fn is_locked(&self, lock: &LockIdentity) -> LockResult<bool> {
        let used: i64 = sqlx::query_scalar("SELECT IS_USED_LOCK(?) IS NOT NULL")
            .bind(&lock.key)
            .fetch_one(&self.pool)
            .await?;
        Ok(used == 1)
    }
}
