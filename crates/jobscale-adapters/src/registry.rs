//! Closed set of adapter kinds, selected by the `kind` key of a worker's
//! `[adapter]` table.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapter::InfrastructureAdapter;
use crate::error::AdapterResult;
use crate::heroku::{HerokuAdapter, HerokuSettings};
use crate::kubernetes::{KubernetesAdapter, KubernetesSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Heroku,
    Kubernetes,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 2] = [AdapterKind::Heroku, AdapterKind::Kubernetes];

    pub fn as_str(self) -> &'static str {
        match self {
            AdapterKind::Heroku => "heroku",
            AdapterKind::Kubernetes => "kubernetes",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AdapterKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown adapter '{s}', expected one of: {}", ADAPTER_KINDS.join(", ")))
    }
}

/// Names accepted for `kind`.
pub const ADAPTER_KINDS: [&str; 2] = ["heroku", "kubernetes"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterSettings {
    Heroku(HerokuSettings),
    Kubernetes(KubernetesSettings),
}

impl Default for AdapterSettings {
    fn default() -> Self {
        AdapterSettings::Heroku(HerokuSettings::default())
    }
}

impl AdapterSettings {
    pub fn kind(&self) -> AdapterKind {
        match self {
            AdapterSettings::Heroku(_) => AdapterKind::Heroku,
            AdapterSettings::Kubernetes(_) => AdapterKind::Kubernetes,
        }
    }
}

/// Construct the adapter described by `settings`.
///
/// Missing credentials do not fail here; the adapter reports them through
/// `configuration_errors` and refuses platform calls until fixed.
pub fn build_adapter(
    settings: &AdapterSettings,
    dry_run: bool,
) -> AdapterResult<Arc<dyn InfrastructureAdapter>> {
    Ok(match settings {
        AdapterSettings::Heroku(s) => {
            Arc::new(HerokuAdapter::new(s.clone().with_env_fallbacks(), dry_run)?)
        }
        AdapterSettings::Kubernetes(s) => Arc::new(KubernetesAdapter::new(s.clone(), dry_run)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in AdapterKind::ALL {
            assert_eq!(kind.as_str().parse::<AdapterKind>().unwrap(), kind);
            assert!(ADAPTER_KINDS.contains(&kind.as_str()));
        }
        assert!("ecs".parse::<AdapterKind>().is_err());
    }

    #[test]
    fn settings_are_tagged_by_kind() {
        let settings: AdapterSettings = serde_json::from_str(
            r#"{"kind":"kubernetes","deployment":"worker","namespace":"jobs","api_url":"http://127.0.0.1:1"}"#,
        )
        .unwrap();
        assert_eq!(settings.kind(), AdapterKind::Kubernetes);

        let adapter = build_adapter(&settings, true).unwrap();
        assert_eq!(adapter.name(), "kubernetes");
        assert!(adapter.is_configured());
    }

    #[test]
    fn heroku_defaults_fill_in() {
        let settings: AdapterSettings =
            serde_json::from_str(r#"{"kind":"heroku","app_name":"shop","api_key":"k"}"#).unwrap();
        let AdapterSettings::Heroku(heroku) = &settings else {
            panic!("expected heroku settings");
        };
        assert_eq!(heroku.process_type, "worker");
        assert_eq!(heroku.base_url, "https://api.heroku.com");

        let adapter = build_adapter(&settings, false).unwrap();
        assert_eq!(adapter.name(), "heroku");
        assert!(adapter.is_configured());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(serde_json::from_str::<AdapterSettings>(r#"{"kind":"nomad"}"#).is_err());
    }
}
