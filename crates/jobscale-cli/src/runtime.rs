//! Assemble the state store, lock backend, collectors and adapters named in
//! jobscale.toml into an [`Autoscaler`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use jobscale_adapters::build_adapter;
use jobscale_autoscale::{Autoscaler, CooldownStore, CooldownTracker, EventSink, Scaler};
use jobscale_lock::LockBackend;
use jobscale_metrics::{MetricsCollector, PostgresCollector, StoreCollector};
use jobscale_state::{ScaleEvent, SharedStore, StateError, StateStore};

use crate::config::{JobscaleConfig, LockKind, MetricsSource, StateBackend};

/// Where cooldowns, events and table-lock rows live.
#[derive(Debug, Clone)]
pub enum State {
    Local(StateStore),
    Shared(SharedStore),
}

impl State {
    pub async fn list_events(&self, worker: Option<&str>, limit: usize) -> anyhow::Result<Vec<ScaleEvent>> {
        Ok(match self {
            State::Local(state) => state.list_events(worker, limit)?,
            State::Shared(store) => store.list_events(worker, limit).await?,
        })
    }

    pub async fn prune_events_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u32> {
        Ok(match self {
            State::Local(state) => state.prune_events_before(cutoff)?,
            State::Shared(store) => store.prune_events_before(cutoff).await?,
        })
    }

    fn cooldown_store(&self) -> Arc<dyn CooldownStore> {
        match self {
            State::Local(state) => Arc::new(state.clone()),
            State::Shared(store) => Arc::new(store.clone()),
        }
    }

    fn event_sink(&self) -> Arc<dyn EventSink> {
        match self {
            State::Local(state) => Arc::new(state.clone()),
            State::Shared(store) => Arc::new(store.clone()),
        }
    }
}

/// Open the redb store at `[state] path`, creating parent directories.
fn open_local(config: &JobscaleConfig) -> anyhow::Result<StateStore> {
    let path = &config.state.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let state = match StateStore::open(path) {
        Ok(state) => state,
        Err(e @ StateError::InUse(_)) => {
            return Err(anyhow::Error::new(e).context(
                "another jobscale process holds the redb state file; \
                 stop it or set [state] backend = \"postgres\" to share state",
            ));
        }
        Err(e) => return Err(anyhow::Error::new(e).context(format!("opening {}", path.display()))),
    };
    info!(path = ?path, "state store opened");
    Ok(state)
}

/// Open the state backend named in `[state]`.
pub async fn open_state(config: &JobscaleConfig) -> anyhow::Result<State> {
    match config.state.backend {
        StateBackend::Redb => Ok(State::Local(open_local(config)?)),
        StateBackend::Postgres => {
            let url = config
                .state
                .database_url
                .as_deref()
                .context("[state] database_url is required")?;
            let pool = PgPoolOptions::new().max_connections(4).connect(url).await?;
            let store = SharedStore::connect(pool, &config.state.table_prefix).await?;
            info!(table = %store.locks_table(), "shared state store ready");
            Ok(State::Shared(store))
        }
    }
}

async fn lock_backend(config: &JobscaleConfig, state: &State) -> anyhow::Result<LockBackend> {
    let url = config.lock.database_url.as_deref();
    let stale_after = Duration::from_secs(config.lock.stale_after_seconds);
    let backend = match config.lock.backend {
        LockKind::Table => match state {
            State::Local(state) => LockBackend::Table {
                state: state.clone(),
                stale_after,
            },
            State::Shared(store) => LockBackend::SharedTable {
                store: store.clone(),
                stale_after,
            },
        },
        LockKind::Postgres => {
            let url = url.context("[lock] database_url is required")?;
            LockBackend::Postgres(PgPoolOptions::new().max_connections(4).connect(url).await?)
        }
        LockKind::Mysql => {
            let url = url.context("[lock] database_url is required")?;
            LockBackend::MySql(MySqlPoolOptions::new().max_connections(4).connect(url).await?)
        }
    };
    info!(
        backend = backend.name(),
        cross_process = backend.is_cross_process(),
        "lock backend ready"
    );
    Ok(backend)
}

pub async fn build(config: &JobscaleConfig) -> anyhow::Result<Autoscaler> {
    let workers = config.worker_configs()?;
    let state = open_state(config).await?;
    let backend = lock_backend(config, &state).await?;

    let pg_pool = match config.metrics.source {
        MetricsSource::Store => None,
        MetricsSource::Postgres => {
            let url = config
                .metrics
                .database_url
                .as_deref()
                .context("[metrics] database_url is required")?;
            Some(PgPoolOptions::new().max_connections(4).connect(url).await?)
        }
    };

    let cooldowns = Arc::new(CooldownTracker::with_store(state.cooldown_store()));
    let events = state.event_sink();
    let mut autoscaler = Autoscaler::new();

    for (worker, adapter_settings) in workers {
        let adapter = build_adapter(&adapter_settings, worker.dry_run)?;
        for problem in adapter.configuration_errors() {
            tracing::warn!(worker = %worker.name, adapter = adapter.name(), %problem, "adapter misconfigured");
        }

        let collector: Arc<dyn MetricsCollector> = match (&pg_pool, &state) {
            (Some(pool), _) => {
                let mut collector = PostgresCollector::new(pool.clone(), &config.metrics.table_prefix)?;
                if let Some(queues) = &worker.queues {
                    collector = collector.with_queues(queues.iter().cloned().collect());
                }
                Arc::new(collector)
            }
            (None, State::Local(local)) => {
                let mut collector = StoreCollector::new(local.clone()).with_heartbeat_window(
                    Duration::from_secs(config.metrics.heartbeat_window_seconds),
                );
                if let Some(queues) = &worker.queues {
                    collector = collector.with_queues(queues.iter().cloned());
                }
                Arc::new(collector)
            }
            (None, State::Shared(_)) => {
                anyhow::bail!("[metrics] source store needs the redb state backend")
            }
        };

        let scaler = Scaler::new(worker, collector, adapter, &backend)?
            .with_cooldowns(cooldowns.clone())
            .with_events(events.clone());
        autoscaler.register(scaler)?;
    }

    Ok(autoscaler)
}
