//! Heroku Platform API formation adapter.
//!
//! A worker group maps to one process type of one app. The formation
//! `quantity` is the worker count.

use std::env;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::adapter::InfrastructureAdapter;
use crate::error::{AdapterError, AdapterResult};
use crate::http::send_json;
use crate::retry::RetryPolicy;

const PROVIDER: &str = "heroku";
const ACCEPT_V3: &str = "application/vnd.heroku+json; version=3";

pub const DEFAULT_BASE_URL: &str = "https://api.heroku.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HerokuSettings {
    /// Falls back to `HEROKU_API_KEY`.
    pub api_key: Option<String>,
    /// Falls back to `HEROKU_APP_NAME`.
    pub app_name: Option<String>,
    pub process_type: String,
    pub base_url: String,
    /// Dyno size sent when the formation has to be created.
    pub dyno_size: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for HerokuSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            app_name: None,
            process_type: "worker".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            dyno_size: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl HerokuSettings {
    /// Fill unset credentials from the environment.
    pub fn with_env_fallbacks(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = env::var("HEROKU_API_KEY").ok().filter(|v| !v.is_empty());
        }
        if self.app_name.is_none() {
            self.app_name = env::var("HEROKU_APP_NAME").ok().filter(|v| !v.is_empty());
        }
        self
    }
}

#[derive(Debug, Deserialize)]
struct Formation {
    #[serde(rename = "type")]
    process_type: String,
    quantity: u32,
}

pub struct HerokuAdapter {
    settings: HerokuSettings,
    client: Client,
    dry_run: bool,
}

impl HerokuAdapter {
    pub fn new(settings: HerokuSettings, dry_run: bool) -> AdapterResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("jobscale/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdapterError::Transport {
                provider: PROVIDER,
                message: e.to_string(),
            })?;
        Ok(Self {
            settings,
            client,
            dry_run,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    pub fn settings(&self) -> &HerokuSettings {
        &self.settings
    }

    fn ensure_configured(&self) -> AdapterResult<(&str, &str)> {
        match (&self.settings.api_key, &self.settings.app_name) {
            (Some(key), Some(app)) if self.configuration_errors().is_empty() => {
                Ok((key.as_str(), app.as_str()))
            }
            _ => Err(AdapterError::NotConfigured {
                provider: PROVIDER,
                errors: self.configuration_errors(),
            }),
        }
    }

    fn formation_url(&self, app: &str) -> String {
        format!(
            "{}/apps/{}/formation/{}",
            self.settings.base_url.trim_end_matches('/'),
            app,
            self.settings.process_type
        )
    }

    fn batch_url(&self, app: &str) -> String {
        format!(
            "{}/apps/{}/formation",
            self.settings.base_url.trim_end_matches('/'),
            app
        )
    }

    async fn patch_quantity(&self, key: &str, app: &str, quantity: u32) -> AdapterResult<u32> {
        let url = self.formation_url(app);
        self.settings
            .retry
            .run("heroku.scale", || async {
                let request = self
                    .client
                    .patch(&url)
                    .header(ACCEPT, ACCEPT_V3)
                    .header(AUTHORIZATION, format!("Bearer {key}"))
                    .json(&json!({ "quantity": quantity }));
                send_json::<Formation>(PROVIDER, request).await
            })
            .await
            .map(|f| f.quantity)
    }

    /// Batch update, which creates the formation when it does not exist.
    async fn create_formation(&self, key: &str, app: &str, quantity: u32) -> AdapterResult<u32> {
        let url = self.batch_url(app);
        let mut update = json!({
            "type": self.settings.process_type,
            "quantity": quantity,
        });
        if let Some(size) = &self.settings.dyno_size {
            update["size"] = json!(size);
        }
        let body = json!({ "updates": [update] });

        let formations = self
            .settings
            .retry
            .run("heroku.create_formation", || async {
                let request = self
                    .client
                    .patch(&url)
                    .header(ACCEPT, ACCEPT_V3)
                    .header(AUTHORIZATION, format!("Bearer {key}"))
                    .json(&body);
                send_json::<Vec<Formation>>(PROVIDER, request).await
            })
            .await?;

        Ok(formations
            .into_iter()
            .find(|f| f.process_type == self.settings.process_type)
            .map_or(quantity, |f| f.quantity))
    }
}

#[async_trait]
impl InfrastructureAdapter for HerokuAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn configuration_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.settings.api_key.as_deref().is_none_or(str::is_empty) {
            errors.push("api_key is required (or set HEROKU_API_KEY)".to_string());
        }
        if self.settings.app_name.as_deref().is_none_or(str::is_empty) {
            errors.push("app_name is required (or set HEROKU_APP_NAME)".to_string());
        }
        if self.settings.process_type.trim().is_empty() {
            errors.push("process_type must not be empty".to_string());
        }
        if self.settings.base_url.trim().is_empty() {
            errors.push("base_url must not be empty".to_string());
        }
        errors
    }

    async fn current_workers(&self) -> AdapterResult<u32> {
        let (key, app) = self.ensure_configured()?;
        let url = self.formation_url(app);
        let result = self
            .settings
            .retry
            .run("heroku.current_workers", || async {
                let request = self
                    .client
                    .get(&url)
                    .header(ACCEPT, ACCEPT_V3)
                    .header(AUTHORIZATION, format!("Bearer {key}"));
                send_json::<Formation>(PROVIDER, request).await
            })
            .await;

        match result {
            Ok(formation) => Ok(formation.quantity),
            Err(e) if e.is_not_found() => {
                debug!(app, process_type = %self.settings.process_type, "formation not found, reporting 0 workers");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    async fn scale(&self, quantity: u32) -> AdapterResult<u32> {
        if self.dry_run {
            info!(
                app = self.settings.app_name.as_deref().unwrap_or("-"),
                process_type = %self.settings.process_type,
                quantity,
                "[dry run] would scale heroku formation"
            );
            return Ok(quantity);
        }

        let (key, app) = self.ensure_configured()?;
        match self.patch_quantity(key, app, quantity).await {
            Ok(confirmed) => {
                info!(app, process_type = %self.settings.process_type, quantity = confirmed, "scaled heroku formation");
                Ok(confirmed)
            }
            Err(e) if e.is_not_found() => {
                info!(app, process_type = %self.settings.process_type, quantity, "formation missing, creating it");
                self.create_formation(key, app, quantity).await
            }
            Err(e) => Err(e),
        }
    }
}
