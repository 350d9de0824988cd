//! Autoscaler — the registry of worker groups and the periodic loop.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use jobscale_state::MetricsSnapshot;

use crate::config::ConfigError;
use crate::cooldown::CooldownState;
use crate::error::ScaleError;
use crate::scaler::{ScaleResult, Scaler};

/// Named [`Scaler`]s, iterated in name order.
#[derive(Debug, Default)]
pub struct Autoscaler {
    scalers: BTreeMap<String, Scaler>,
}

impl Autoscaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker group. Names must be unique.
    pub fn register(&mut self, scaler: Scaler) -> Result<(), ConfigError> {
        let name = scaler.name().to_string();
        if self.scalers.contains_key(&name) {
            return Err(ConfigError::Duplicate(name));
        }
        info!(worker = %name, adapter = scaler.adapter().name(), "worker group registered");
        self.scalers.insert(name, scaler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Scaler> {
        self.scalers.get(name)
    }

    fn scaler(&self, name: &str) -> Result<&Scaler, ScaleError> {
        self.get(name)
            .ok_or_else(|| ScaleError::UnknownWorker(name.to_string()))
    }

    pub fn registered_workers(&self) -> Vec<&str> {
        self.scalers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scalers.is_empty()
    }

    /// Non-blocking run for one group.
    pub async fn scale(&self, name: &str) -> Result<ScaleResult, ScaleError> {
        Ok(self.scaler(name)?.run().await)
    }

    /// Blocking run for one group; lock timeouts are returned as errors.
    pub async fn scale_wait(&self, name: &str) -> Result<ScaleResult, ScaleError> {
        Ok(self.scaler(name)?.run_wait().await?)
    }

    /// Run every group once, one after another.
    pub async fn scale_all(&self) -> Vec<ScaleResult> {
        let mut results = Vec::with_capacity(self.scalers.len());
        for scaler in self.scalers.values() {
            results.push(scaler.run().await);
        }
        results
    }

    pub async fn metrics(&self, name: &str) -> Result<MetricsSnapshot, ScaleError> {
        Ok(self.scaler(name)?.metrics().await?)
    }

    pub async fn current_workers(&self, name: &str) -> Result<u32, ScaleError> {
        self.scaler(name)?.current_workers().await
    }

    pub async fn cooldown_state(&self, name: &str) -> Result<CooldownState, ScaleError> {
        Ok(self.scaler(name)?.cooldown_state().await)
    }

    /// Clear cooldowns for one group, or for all of them.
    pub async fn reset_cooldowns(&self, name: Option<&str>) -> Result<(), ScaleError> {
        match name {
            Some(name) => self.scaler(name)?.reset_cooldowns().await,
            None => {
                for scaler in self.scalers.values() {
                    scaler.reset_cooldowns().await;
                }
            }
        }
        Ok(())
    }

    /// Run `scale_all` every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            workers = self.scalers.len(),
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    for result in self.scale_all().await {
                        if result.error().is_some() {
                            error!(summary = %result.summary(), "scale run failed");
                        } else if result.is_skipped() {
                            warn!(summary = %result.summary(), "scale run skipped");
                        } else {
                            info!(summary = %result.summary(), "scale run complete");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}
