//! jobscale.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use jobscale_adapters::{AdapterSettings, HerokuSettings};
use jobscale_autoscale::{ConfigError, WorkerConfig, WorkerSettings};
use jobscale_metrics::postgres::{DEFAULT_TABLE_PREFIX, validate_table_prefix};
use jobscale_state::shared::is_valid_table_prefix;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobscaleConfig {
    pub state: StateSection,
    pub lock: LockSection,
    pub metrics: MetricsSection,
    pub workers: Vec<WorkerEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// Local redb file. One process at a time.
    #[default]
    Redb,
    /// `{table_prefix}autoscaler_*` tables shared by every process.
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    pub backend: StateBackend,
    /// redb file holding cooldowns, events, lock rows and the job backlog.
    pub path: PathBuf,
    pub database_url: Option<String>,
    pub table_prefix: String,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            backend: StateBackend::Redb,
            path: PathBuf::from("jobscale.redb"),
            database_url: None,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    #[default]
    Table,
    Postgres,
    Mysql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSection {
    pub backend: LockKind,
    pub database_url: Option<String>,
    pub stale_after_seconds: u64,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            backend: LockKind::Table,
            database_url: None,
            stale_after_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSource {
    #[default]
    Store,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub source: MetricsSource,
    pub database_url: Option<String>,
    pub table_prefix: String,
    pub heartbeat_window_seconds: u64,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            source: MetricsSource::Store,
            database_url: None,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            heartbeat_window_seconds: 300,
        }
    }
}

/// One `[[workers]]` table: scaling settings plus its `[workers.adapter]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerEntry {
    #[serde(flatten)]
    pub settings: WorkerSettings,
    #[serde(default)]
    pub adapter: AdapterSettings,
}

impl JobscaleConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: JobscaleConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate every worker group and the cross-cutting sections.
    pub fn worker_configs(&self) -> anyhow::Result<Vec<(WorkerConfig, AdapterSettings)>> {
        if self.state.backend == StateBackend::Postgres {
            if self.state.database_url.is_none() {
                anyhow::bail!("[state] backend postgres needs database_url");
            }
            if !is_valid_table_prefix(&self.state.table_prefix) {
                anyhow::bail!("[state] invalid table_prefix {:?}", self.state.table_prefix);
            }
            if self.metrics.source == MetricsSource::Store {
                anyhow::bail!(
                    "[metrics] source store reads the local redb file; use source postgres with a postgres state backend"
                );
            }
        }
        if self.lock.backend != LockKind::Table && self.lock.database_url.is_none() {
            anyhow::bail!("[lock] backend {:?} needs database_url", self.lock.backend);
        }
        if self.metrics.source == MetricsSource::Postgres {
            if self.metrics.database_url.is_none() {
                anyhow::bail!("[metrics] source postgres needs database_url");
            }
            validate_table_prefix(&self.metrics.table_prefix)?;
        }

        let mut configs: Vec<(WorkerConfig, AdapterSettings)> = Vec::new();
        for entry in &self.workers {
            let config = entry.settings.build()?;
            if configs.iter().any(|(c, _)| c.name == config.name) {
                return Err(ConfigError::Duplicate(config.name).into());
            }
            configs.push((config, entry.adapter.clone()));
        }
        if configs.is_empty() {
            anyhow::bail!("no [[workers]] configured");
        }
        Ok(configs)
    }

    /// A starter file with one Heroku-backed worker group.
    pub fn scaffold() -> Self {
        JobscaleConfig {
            state: StateSection::default(),
            lock: LockSection::default(),
            metrics: MetricsSection::default(),
            workers: vec![WorkerEntry {
                settings: WorkerSettings {
                    name: Some("default".to_string()),
                    min_workers: Some(1),
                    max_workers: Some(10),
                    scale_up_queue_depth: Some(100),
                    scale_up_latency_seconds: Some(300.0),
                    scale_down_queue_depth: Some(10),
                    scale_down_latency_seconds: Some(30.0),
                    cooldown_seconds: Some(120),
                    dry_run: Some(true),
                    ..WorkerSettings::default()
                },
                adapter: AdapterSettings::Heroku(HerokuSettings {
                    app_name: Some("my-app".to_string()),
                    ..HerokuSettings::default()
                }),
            }],
        }
    }
}
