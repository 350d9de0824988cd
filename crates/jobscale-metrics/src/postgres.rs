//! Postgres backlog collector.
//!
//! Reads a Solid Queue style schema: one table per execution state
//! (`ready_executions`, `claimed_executions`, `failed_executions`,
//! `blocked_executions`) plus `jobs` and `processes`, all sharing a
//! configurable table prefix. The store is only ever read.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;

use jobscale_state::MetricsSnapshot;
use jobscale_state::shared::is_valid_table_prefix;
pub use jobscale_state::shared::DEFAULT_TABLE_PREFIX;

use crate::collector::MetricsCollector;
use crate::error::{MetricsError, MetricsResult};

/// Check that a table prefix is safe to splice into SQL.
pub fn validate_table_prefix(prefix: &str) -> MetricsResult<()> {
    if is_valid_table_prefix(prefix) {
        Ok(())
    } else {
        Err(MetricsError::Configuration(format!(
            "table_prefix {prefix:?} must match [a-z_][a-z0-9_]*"
        )))
    }
}

/// Collects backlog metrics from Postgres.
#[derive(Debug, Clone)]
pub struct PostgresCollector {
    pool: PgPool,
    prefix: String,
    queues: Option<Vec<String>>,
}

impl PostgresCollector {
    /// Create a collector. Fails if the table prefix is not an identifier.
    pub fn new(pool: PgPool, table_prefix: &str) -> MetricsResult<Self> {
        validate_table_prefix(table_prefix)?;
        Ok(Self {
            pool,
            prefix: table_prefix.to_string(),
            queues: None,
        })
    }

    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        self.queues = Some(queues);
        self
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn count(&self, sql: &str) -> MetricsResult<u64> {
        let n: i64 = sqlx::query_scalar(sql)
            .bind(self.queues.as_deref())
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl MetricsCollector for PostgresCollector {
    async fn collect(&self) -> MetricsResult<MetricsSnapshot> {
        let ready = self.table("ready_executions");
        let claimed = self.table("claimed_executions");
        let failed = self.table("failed_executions");
        let blocked = self.table("blocked_executions");
        let jobs = self.table("jobs");
        let processes = self.table("processes");
        const QUEUE_FILTER: &str = "($1::text[] IS NULL OR queue_name = ANY($1))";

        let mut snapshot = MetricsSnapshot::empty(Utc::now());

        snapshot.queue_depth = self
            .count(&format!("SELECT COUNT(*) FROM {ready} WHERE {QUEUE_FILTER}"))
            .await?;

        let oldest: Option<f64> = sqlx::query_scalar(&format!(
            "SELECT EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::float8 \
             FROM {ready} WHERE {QUEUE_FILTER}"
        ))
        .bind(self.queues.as_deref())
        .fetch_one(&self.pool)
        .await?;
        snapshot.oldest_job_age_seconds = oldest.unwrap_or(0.0).max(0.0);

        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT queue_name, COUNT(*) FROM {ready} WHERE {QUEUE_FILTER} GROUP BY queue_name"
        ))
        .bind(self.queues.as_deref())
        .fetch_all(&self.pool)
        .await?;
        snapshot.per_queue_depth = rows
            .into_iter()
            .map(|(queue, n)| (queue, n.max(0) as u64))
            .collect::<BTreeMap<_, _>>();

        snapshot.claimed_jobs = self
            .count(&format!(
                "SELECT COUNT(*) FROM {claimed} c JOIN {jobs} j ON j.id = c.job_id \
                 WHERE ($1::text[] IS NULL OR j.queue_name = ANY($1))"
            ))
            .await?;
        snapshot.failed_jobs = self
            .count(&format!(
                "SELECT COUNT(*) FROM {failed} f JOIN {jobs} j ON j.id = f.job_id \
                 WHERE ($1::text[] IS NULL OR j.queue_name = ANY($1))"
            ))
            .await?;
        snapshot.blocked_jobs = self
            .count(&format!("SELECT COUNT(*) FROM {blocked} WHERE {QUEUE_FILTER}"))
            .await?;
        snapshot.jobs_completed_per_minute = self
            .count(&format!(
                "SELECT COUNT(*) FROM {jobs} \
                 WHERE finished_at > NOW() - INTERVAL '1 minute' AND {QUEUE_FILTER}"
            ))
            .await?;

        let active: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {processes} \
             WHERE kind = 'Worker' AND last_heartbeat_at > NOW() - INTERVAL '5 minutes'"
        ))
        .fetch_one(&self.pool)
        .await?;
        snapshot.active_workers = active.max(0) as u64;

        debug!(
            queue_depth = snapshot.queue_depth,
            oldest_job_age_seconds = snapshot.oldest_job_age_seconds,
            claimed = snapshot.claimed_jobs,
            active_workers = snapshot.active_workers,
            "postgres backlog metrics collected"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_prefix_accepts_identifiers() {
        assert!(validate_table_prefix("solid_queue_").is_ok());
        assert!(validate_table_prefix("_jobs").is_ok());
        assert!(validate_table_prefix("q2_").is_ok());
    }

    #[test]
    fn table_prefix_rejects_injection() {
        assert!(validate_table_prefix("").is_err());
        assert!(validate_table_prefix("2q_").is_err());
        assert!(validate_table_prefix("solid_queue_; DROP TABLE jobs; --").is_err());
        assert!(validate_table_prefix("Solid").is_err());
    }

    #[tokio::test]
    async fn new_rejects_bad_prefix_before_querying() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/jobscale")
            .unwrap();
        let err = PostgresCollector::new(pool, "bad prefix").unwrap_err();
        assert!(matches!(err, MetricsError::Configuration(_)));
    }
}
