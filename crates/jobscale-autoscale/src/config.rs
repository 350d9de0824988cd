//! Per worker-group configuration.
//!
//! [`WorkerSettings`] is the raw, all-optional form read from TOML.
//! [`WorkerSettings::build`] fills defaults and validates, producing a
//! [`WorkerConfig`] the rest of the crate can trust.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cooldown::Direction;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid regex"));
static QUEUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.:-]*$").expect("valid regex"));

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration for worker '{name}': {}", .violations.join("; "))]
    Invalid { name: String, violations: Vec<String> },

    #[error("worker '{0}' is already registered")]
    Duplicate(String),
}

/// How the target worker count is computed once a threshold trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStrategy {
    /// Step by the configured increment or decrement.
    #[default]
    Fixed,
    /// Size the step by how far the backlog is past its threshold.
    Proportional,
    /// Tiered thresholds. Not implemented yet; computes like `Fixed`.
    StepFunction,
}

impl ScalingStrategy {
    pub const NAMES: [&'static str; 3] = ["fixed", "proportional", "step_function"];

    pub fn as_str(self) -> &'static str {
        match self {
            ScalingStrategy::Fixed => "fixed",
            ScalingStrategy::Proportional => "proportional",
            ScalingStrategy::StepFunction => "step_function",
        }
    }
}

impl fmt::Display for ScalingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScalingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(ScalingStrategy::Fixed),
            "proportional" => Ok(ScalingStrategy::Proportional),
            "step_function" => Ok(ScalingStrategy::StepFunction),
            other => Err(format!(
                "scaling_strategy '{other}' is not one of {}",
                Self::NAMES.join(", ")
            )),
        }
    }
}

/// Validated settings for one worker group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    pub enabled: bool,
    pub dry_run: bool,

    pub min_workers: u32,
    pub max_workers: u32,

    pub scale_up_queue_depth: u64,
    pub scale_up_latency_seconds: f64,
    pub scale_up_increment: u32,

    pub scale_down_queue_depth: u64,
    pub scale_down_latency_seconds: f64,
    pub scale_down_decrement: u32,

    /// Lower bar used only while the group has zero workers. Both must be
    /// set for the fast path to apply.
    pub scale_from_zero_queue_depth: Option<u64>,
    pub scale_from_zero_latency_seconds: Option<f64>,

    pub scaling_strategy: ScalingStrategy,
    pub scale_up_jobs_per_worker: u64,
    pub scale_up_latency_per_worker: f64,
    pub scale_down_jobs_per_worker: u64,

    pub cooldown_seconds: u64,
    pub scale_up_cooldown_seconds: Option<u64>,
    pub scale_down_cooldown_seconds: Option<u64>,

    pub lock_key: String,
    pub lock_timeout_seconds: u64,

    /// Restrict metrics to these queues. `None` means every queue.
    pub queues: Option<BTreeSet<String>>,

    pub persist_cooldowns: bool,
    pub record_events: bool,
    pub record_all_events: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::named("default")
    }
}

impl WorkerConfig {
    /// Defaults for a group called `name`, with a name-derived lock key.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            lock_key: default_lock_key(&name),
            name,
            enabled: true,
            dry_run: false,
            min_workers: 1,
            max_workers: 10,
            scale_up_queue_depth: 100,
            scale_up_latency_seconds: 300.0,
            scale_up_increment: 1,
            scale_down_queue_depth: 10,
            scale_down_latency_seconds: 30.0,
            scale_down_decrement: 1,
            scale_from_zero_queue_depth: Some(1),
            scale_from_zero_latency_seconds: Some(1.0),
            scaling_strategy: ScalingStrategy::Fixed,
            scale_up_jobs_per_worker: 50,
            scale_up_latency_per_worker: 60.0,
            scale_down_jobs_per_worker: 50,
            cooldown_seconds: 120,
            scale_up_cooldown_seconds: None,
            scale_down_cooldown_seconds: None,
            lock_timeout_seconds: 30,
            queues: None,
            persist_cooldowns: true,
            record_events: true,
            record_all_events: false,
        }
    }

    pub fn scale_from_zero_configured(&self) -> bool {
        self.scale_from_zero_queue_depth.is_some() && self.scale_from_zero_latency_seconds.is_some()
    }

    /// Override for `direction` if set, otherwise the base cooldown.
    pub fn effective_cooldown(&self, direction: Direction) -> Duration {
        let secs = match direction {
            Direction::Up => self.scale_up_cooldown_seconds,
            Direction::Down => self.scale_down_cooldown_seconds,
        };
        Duration::from_secs(secs.unwrap_or(self.cooldown_seconds))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    /// Clamp `workers` into `[min_workers, max_workers]`.
    pub fn clamp(&self, workers: u32) -> u32 {
        workers.max(self.min_workers).min(self.max_workers)
    }

    /// Check every invariant and report all violations at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                name: self.name.clone(),
                violations,
            })
        }
    }

    fn violations(&self) -> Vec<String> {
        let mut v = Vec::new();

        if !NAME_RE.is_match(&self.name) {
            v.push(format!("name '{}' must match {}", self.name, NAME_RE.as_str()));
        }

        if self.max_workers == 0 {
            v.push("max_workers must be > 0".to_string());
        }
        if self.min_workers > self.max_workers {
            v.push(format!(
                "min_workers ({}) must be <= max_workers ({})",
                self.min_workers, self.max_workers
            ));
        }

        if self.scale_up_queue_depth == 0 {
            v.push("scale_up_queue_depth must be > 0".to_string());
        }
        positive(&mut v, "scale_up_latency_seconds", self.scale_up_latency_seconds);
        if self.scale_up_increment == 0 {
            v.push("scale_up_increment must be > 0".to_string());
        }

        non_negative(&mut v, "scale_down_latency_seconds", self.scale_down_latency_seconds);
        if self.scale_down_decrement == 0 {
            v.push("scale_down_decrement must be > 0".to_string());
        }

        if self.scale_from_zero_queue_depth == Some(0) {
            v.push("scale_from_zero_queue_depth must be > 0".to_string());
        }
        if let Some(latency) = self.scale_from_zero_latency_seconds {
            non_negative(&mut v, "scale_from_zero_latency_seconds", latency);
        }

        if self.scale_up_jobs_per_worker == 0 {
            v.push("scale_up_jobs_per_worker must be > 0".to_string());
        }
        positive(&mut v, "scale_up_latency_per_worker", self.scale_up_latency_per_worker);
        if self.scale_down_jobs_per_worker == 0 {
            v.push("scale_down_jobs_per_worker must be > 0".to_string());
        }

        if self.lock_key.is_empty() {
            v.push("lock_key must not be empty".to_string());
        } else if self.lock_key.chars().any(char::is_whitespace) {
            v.push(format!("lock_key '{}' must not contain whitespace", self.lock_key));
        }
        if self.lock_timeout_seconds == 0 {
            v.push("lock_timeout_seconds must be > 0".to_string());
        }

        if let Some(queues) = &self.queues {
            if queues.is_empty() {
                v.push("queues must not be empty when set".to_string());
            }
            for queue in queues.iter().filter(|q| !QUEUE_RE.is_match(q)) {
                v.push(format!("queue name '{queue}' is not a valid identifier"));
            }
        }

        v
    }
}

fn positive(v: &mut Vec<String>, field: &str, value: f64) {
    if !(value.is_finite() && value > 0.0) {
        v.push(format!("{field} must be > 0"));
    }
}

fn non_negative(v: &mut Vec<String>, field: &str, value: f64) {
    if !(value.is_finite() && value >= 0.0) {
        v.push(format!("{field} must be >= 0"));
    }
}

pub fn default_lock_key(name: &str) -> String {
    format!("jobscale_{name}")
}

/// Raw worker settings as they appear in a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub dry_run: Option<bool>,
    pub min_workers: Option<u32>,
    pub max_workers: Option<u32>,
    pub scale_up_queue_depth: Option<u64>,
    pub scale_up_latency_seconds: Option<f64>,
    pub scale_up_increment: Option<u32>,
    pub scale_down_queue_depth: Option<u64>,
    pub scale_down_latency_seconds: Option<f64>,
    pub scale_down_decrement: Option<u32>,
    /// `false` turns the cold-fleet fast path off; the thresholds below
    /// must then be left unset.
    pub scale_from_zero: Option<bool>,
    pub scale_from_zero_queue_depth: Option<u64>,
    pub scale_from_zero_latency_seconds: Option<f64>,
    pub scaling_strategy: Option<String>,
    pub scale_up_jobs_per_worker: Option<u64>,
    pub scale_up_latency_per_worker: Option<f64>,
    pub scale_down_jobs_per_worker: Option<u64>,
    pub cooldown_seconds: Option<u64>,
    pub scale_up_cooldown_seconds: Option<u64>,
    pub scale_down_cooldown_seconds: Option<u64>,
    pub lock_key: Option<String>,
    pub lock_timeout_seconds: Option<u64>,
    pub queues: Option<Vec<String>>,
    pub persist_cooldowns: Option<bool>,
    pub record_events: Option<bool>,
    pub record_all_events: Option<bool>,
}

impl WorkerSettings {
    /// Fill defaults and validate.
    pub fn build(&self) -> Result<WorkerConfig, ConfigError> {
        let name = self.name.clone().unwrap_or_else(|| "default".to_string());
        let mut config = WorkerConfig::named(name);
        let mut violations = Vec::new();

        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field.clone() {
                    config.$field = value;
                })*
            };
        }
        take!(
            enabled,
            dry_run,
            min_workers,
            max_workers,
            scale_up_queue_depth,
            scale_up_latency_seconds,
            scale_up_increment,
            scale_down_queue_depth,
            scale_down_latency_seconds,
            scale_down_decrement,
            scale_up_jobs_per_worker,
            scale_up_latency_per_worker,
            scale_down_jobs_per_worker,
            cooldown_seconds,
            lock_key,
            lock_timeout_seconds,
            persist_cooldowns,
            record_events,
            record_all_events,
        );

        let thresholds_set =
            self.scale_from_zero_queue_depth.is_some() || self.scale_from_zero_latency_seconds.is_some();
        if self.scale_from_zero == Some(false) {
            config.scale_from_zero_queue_depth = None;
            config.scale_from_zero_latency_seconds = None;
            if thresholds_set {
                violations.push(
                    "scale_from_zero = false conflicts with scale_from_zero_* thresholds".to_string(),
                );
            }
        } else {
            if self.scale_from_zero_queue_depth.is_some() {
                config.scale_from_zero_queue_depth = self.scale_from_zero_queue_depth;
            }
            if self.scale_from_zero_latency_seconds.is_some() {
                config.scale_from_zero_latency_seconds = self.scale_from_zero_latency_seconds;
            }
        }
        config.scale_up_cooldown_seconds = self.scale_up_cooldown_seconds;
        config.scale_down_cooldown_seconds = self.scale_down_cooldown_seconds;
        config.queues = self
            .queues
            .as_ref()
            .map(|queues| queues.iter().cloned().collect());

        if let Some(strategy) = &self.scaling_strategy {
            match strategy.parse() {
                Ok(parsed) => config.scaling_strategy = parsed,
                Err(e) => violations.push(e),
            }
        }

        violations.extend(config.violations());
        if violations.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid {
                name: config.name,
                violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_key, "jobscale_default");
        assert!(config.scale_from_zero_configured());
    }

    #[test]
    fn lock_key_follows_name() {
        let config = WorkerSettings {
            name: Some("critical".to_string()),
            ..WorkerSettings::default()
        }
        .build()
        .unwrap();
        assert_eq!(config.lock_key, "jobscale_critical");
    }

    #[test]
    fn every_violation_is_reported() {
        let settings = WorkerSettings {
            name: Some("bad name".to_string()),
            min_workers: Some(5),
            max_workers: Some(2),
            scale_up_increment: Some(0),
            scaling_strategy: Some("exponential".to_string()),
            lock_key: Some("has space".to_string()),
            ..WorkerSettings::default()
        };

        let ConfigError::Invalid { name, violations } = settings.build().unwrap_err() else {
            panic!("expected Invalid");
        };
        assert_eq!(name, "bad name");
        assert_eq!(violations.len(), 5, "{violations:?}");
        assert!(violations.iter().any(|v| v.contains("exponential")));
        assert!(violations.iter().any(|v| v.contains("min_workers (5)")));
    }

    #[test]
    fn error_message_joins_violations() {
        let config = WorkerConfig {
            max_workers: 0,
            min_workers: 0,
            scale_up_latency_seconds: -1.0,
            ..WorkerConfig::default()
        };
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("max_workers must be > 0"));
        assert!(message.contains("scale_up_latency_seconds must be > 0"));
    }

    #[test]
    fn effective_cooldown_prefers_override() {
        let config = WorkerConfig {
            cooldown_seconds: 120,
            scale_up_cooldown_seconds: Some(30),
            ..WorkerConfig::default()
        };
        assert_eq!(config.effective_cooldown(Direction::Up), Duration::from_secs(30));
        assert_eq!(config.effective_cooldown(Direction::Down), Duration::from_secs(120));
    }

    #[test]
    fn queue_filter_is_validated() {
        let settings = WorkerSettings {
            queues: Some(vec!["default".to_string(), "bad queue".to_string()]),
            ..WorkerSettings::default()
        };
        let err = settings.build().unwrap_err().to_string();
        assert!(err.contains("bad queue"));
    }

    #[test]
    fn from_zero_path_is_on_unless_switched_off() {
        let config = WorkerSettings::default().build().unwrap();
        assert_eq!(config.scale_from_zero_queue_depth, Some(1));

        let settings: WorkerSettings = toml::from_str("scale_from_zero = false").unwrap();
        let config = settings.build().unwrap();
        assert!(!config.scale_from_zero_configured());
        assert_eq!(config.scale_from_zero_latency_seconds, None);
    }

    #[test]
    fn disabled_from_zero_rejects_its_thresholds() {
        let settings = WorkerSettings {
            scale_from_zero: Some(false),
            scale_from_zero_queue_depth: Some(5),
            ..WorkerSettings::default()
        };
        let err = settings.build().unwrap_err().to_string();
        assert!(err.contains("scale_from_zero = false"), "{err}");
    }

    #[test]
    fn parses_from_toml() {
        let settings: WorkerSettings = toml::from_str(
            r#"
            name = "mailers"
            max_workers = 4
            scaling_strategy = "proportional"
            queues = ["mailers"]
            "#,
        )
        .unwrap();
        let config = settings.build().unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.scaling_strategy, ScalingStrategy::Proportional);
        assert_eq!(config.queues.unwrap().len(), 1);
    }
}
