//! Kubernetes Deployment scale-subresource adapter.
//!
//! Credentials come from explicit settings first and otherwise from the
//! service account mounted into the pod. The token file is re-read on every
//! call since projected tokens rotate.

use std::env;
use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Certificate, Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::adapter::InfrastructureAdapter;
use crate::error::{AdapterError, AdapterResult};
use crate::http::send_json;
use crate::retry::RetryPolicy;

const PROVIDER: &str = "kubernetes";
const MERGE_PATCH: &str = "application/merge-patch+json";

pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesSettings {
    pub deployment: String,
    /// Falls back to the pod's namespace, then `default`.
    pub namespace: Option<String>,
    /// Falls back to `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT`.
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub token_path: String,
    pub ca_cert_path: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub retry: RetryPolicy,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            deployment: String::new(),
            namespace: None,
            api_url: None,
            token: None,
            token_path: format!("{SERVICE_ACCOUNT_DIR}/token"),
            ca_cert_path: None,
            insecure_skip_tls_verify: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Scale {
    #[serde(default)]
    spec: ScaleSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ScaleSpec {
    #[serde(default)]
    replicas: u32,
}

pub struct KubernetesAdapter {
    settings: KubernetesSettings,
    api_url: Option<String>,
    namespace: String,
    client: Client,
    dry_run: bool,
}

fn in_cluster_api_url() -> Option<String> {
    let host = env::var("KUBERNETES_SERVICE_HOST").ok()?;
    let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
    if host.contains(':') {
        Some(format!("https://[{host}]:{port}"))
    } else {
        Some(format!("https://{host}:{port}"))
    }
}

fn in_cluster_namespace() -> Option<String> {
    std::fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/namespace"))
        .ok()
        .map(|ns| ns.trim().to_string())
        .filter(|ns| !ns.is_empty())
}

impl KubernetesAdapter {
    pub fn new(settings: KubernetesSettings, dry_run: bool) -> AdapterResult<Self> {
        let mut builder = Client::builder().user_agent(concat!("jobscale/", env!("CARGO_PKG_VERSION")));

        let default_ca = format!("{SERVICE_ACCOUNT_DIR}/ca.crt");
        let ca_path = settings
            .ca_cert_path
            .clone()
            .or_else(|| Path::new(&default_ca).exists().then_some(default_ca));
        if let Some(path) = ca_path {
            let pem = std::fs::read(&path).map_err(|e| AdapterError::NotConfigured {
                provider: PROVIDER,
                errors: vec![format!("cannot read CA certificate {path}: {e}")],
            })?;
            let cert = Certificate::from_pem(&pem).map_err(|e| AdapterError::NotConfigured {
                provider: PROVIDER,
                errors: vec![format!("invalid CA certificate {path}: {e}")],
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if settings.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| AdapterError::Transport {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

        let api_url = settings
            .api_url
            .clone()
            .or_else(in_cluster_api_url)
            .map(|url| url.trim_end_matches('/').to_string());
        let namespace = settings
            .namespace
            .clone()
            .or_else(in_cluster_namespace)
            .unwrap_or_else(|| "default".to_string());

        Ok(Self {
            settings,
            api_url,
            namespace,
            client,
            dry_run,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn scale_url(&self) -> AdapterResult<String> {
        if !self.is_configured() {
            return Err(AdapterError::NotConfigured {
                provider: PROVIDER,
                errors: self.configuration_errors(),
            });
        }
        let api = self.api_url.as_deref().unwrap_or_default();
        Ok(format!(
            "{api}/apis/apps/v1/namespaces/{}/deployments/{}/scale",
            self.namespace, self.settings.deployment
        ))
    }

    async fn token(&self) -> AdapterResult<Option<String>> {
        if let Some(token) = &self.settings.token {
            return Ok(Some(token.clone()));
        }
        match tokio::fs::read_to_string(&self.settings.token_path).await {
            Ok(token) => Ok(Some(token.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AdapterError::NotConfigured {
                provider: PROVIDER,
                errors: vec![format!("cannot read token {}: {e}", self.settings.token_path)],
            }),
        }
    }

    fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let request = request.header(ACCEPT, "application/json");
        match token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }
}

#[async_trait]
impl InfrastructureAdapter for KubernetesAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn configuration_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.settings.deployment.trim().is_empty() {
            errors.push("deployment is required".to_string());
        }
        if self.api_url.as_deref().is_none_or(str::is_empty) {
            errors.push("api_url is required outside a cluster".to_string());
        }
        if self.namespace.trim().is_empty() {
            errors.push("namespace must not be empty".to_string());
        }
        errors
    }

    async fn current_workers(&self) -> AdapterResult<u32> {
        let url = self.scale_url()?;
        let token = self.token().await?;
        let result = self
            .settings
            .retry
            .run("kubernetes.current_workers", || async {
                let request = Self::authorize(self.client.get(&url), token.as_deref());
                send_json::<Scale>(PROVIDER, request).await
            })
            .await;

        match result {
            Ok(scale) => Ok(scale.spec.replicas),
            Err(e) if e.is_not_found() => {
                debug!(deployment = %self.settings.deployment, namespace = %self.namespace, "deployment not found, reporting 0 workers");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    async fn scale(&self, quantity: u32) -> AdapterResult<u32> {
        if self.dry_run {
            info!(
                deployment = %self.settings.deployment,
                namespace = %self.namespace,
                quantity,
                "[dry run] would scale kubernetes deployment"
            );
            return Ok(quantity);
        }

        let url = self.scale_url()?;
        let token = self.token().await?;
        let body = json!({ "spec": { "replicas": quantity } }).to_string();
        let scale = self
            .settings
            .retry
            .run("kubernetes.scale", || async {
                let request = Self::authorize(self.client.patch(&url), token.as_deref())
                    .header(CONTENT_TYPE, MERGE_PATCH)
                    .body(body.clone());
                send_json::<Scale>(PROVIDER, request).await
            })
            .await?;

        info!(
            deployment = %self.settings.deployment,
            namespace = %self.namespace,
            replicas = scale.spec.replicas,
            "scaled kubernetes deployment"
        );
        Ok(scale.spec.replicas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::body::Bytes;
    use axum::extract::{Path as UrlPath, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::Value;

    use crate::http::serve;

    #[derive(Default)]
    struct Cluster {
        replicas: Option<u32>,
        content_types: Vec<String>,
        auth: Vec<String>,
        patches: u32,
    }

    type Shared = Arc<Mutex<Cluster>>;

    async fn read_scale(
        State(cluster): State<Shared>,
        UrlPath((ns, name)): UrlPath<(String, String)>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        let mut c = cluster.lock().unwrap();
        if let Some(auth) = headers.get("authorization") {
            c.auth.push(auth.to_str().unwrap().to_string());
        }
        match c.replicas {
            Some(r) if ns == "jobs" && name == "worker" => (
                StatusCode::OK,
                Json(json!({"kind": "Scale", "spec": {"replicas": r}, "status": {"replicas": r}})),
            ),
            _ => (StatusCode::NOT_FOUND, Json(json!({"kind": "Status", "code": 404}))),
        }
    }

    async fn patch_scale(
        State(cluster): State<Shared>,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, Json<Value>) {
        let mut c = cluster.lock().unwrap();
        c.patches += 1;
        if let Some(ct) = headers.get("content-type") {
            c.content_types.push(ct.to_str().unwrap().to_string());
        }
        let patch: Value = serde_json::from_slice(&body).unwrap();
        let r = patch["spec"]["replicas"].as_u64().unwrap() as u32;
        c.replicas = Some(r);
        (StatusCode::OK, Json(json!({"kind": "Scale", "spec": {"replicas": r}})))
    }

    async fn cluster(state: Cluster) -> (String, Shared) {
        let shared = Arc::new(Mutex::new(state));
        let app = Router::new()
            .route(
                "/apis/apps/v1/namespaces/{ns}/deployments/{name}/scale",
                get(read_scale).patch(patch_scale),
            )
            .with_state(shared.clone());
        (serve(app).await, shared)
    }

    fn adapter(api_url: String, dry_run: bool) -> KubernetesAdapter {
        let settings = KubernetesSettings {
            deployment: "worker".to_string(),
            namespace: Some("jobs".to_string()),
            api_url: Some(api_url),
            token: Some("sa-token".to_string()),
            ..KubernetesSettings::default()
        };
        KubernetesAdapter::new(settings, dry_run).unwrap().with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        })
    }

    #[tokio::test]
    async fn reads_spec_replicas() {
        let (url, state) = cluster(Cluster {
            replicas: Some(6),
            ..Cluster::default()
        })
        .await;

        assert_eq!(adapter(url, false).current_workers().await.unwrap(), 6);
        assert_eq!(state.lock().unwrap().auth, vec!["Bearer sa-token"]);
    }

    #[tokio::test]
    async fn missing_deployment_counts_as_zero() {
        let (url, _) = cluster(Cluster::default()).await;
        assert_eq!(adapter(url, false).current_workers().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scale_sends_merge_patch() {
        let (url, state) = cluster(Cluster {
            replicas: Some(1),
            ..Cluster::default()
        })
        .await;

        assert_eq!(adapter(url, false).scale(4).await.unwrap(), 4);
        let c = state.lock().unwrap();
        assert_eq!(c.replicas, Some(4));
        assert_eq!(c.content_types, vec![MERGE_PATCH]);
    }

    #[tokio::test]
    async fn dry_run_sends_nothing() {
        let (url, state) = cluster(Cluster {
            replicas: Some(1),
            ..Cluster::default()
        })
        .await;

        assert_eq!(adapter(url, true).scale(8).await.unwrap(), 8);
        let c = state.lock().unwrap();
        assert_eq!(c.patches, 0);
        assert_eq!(c.replicas, Some(1));
    }

    #[tokio::test]
    async fn token_file_is_used_when_no_token_is_set() {
        let (url, state) = cluster(Cluster {
            replicas: Some(2),
            ..Cluster::default()
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "from-file\n").unwrap();

        let adapter = KubernetesAdapter::new(
            KubernetesSettings {
                deployment: "worker".to_string(),
                namespace: Some("jobs".to_string()),
                api_url: Some(url),
                token_path: token_path.to_string_lossy().into_owned(),
                ..KubernetesSettings::default()
            },
            false,
        )
        .unwrap();

        assert_eq!(adapter.current_workers().await.unwrap(), 2);
        assert_eq!(state.lock().unwrap().auth, vec!["Bearer from-file"]);
    }

    #[test]
    fn deployment_name_is_required() {
        let adapter = KubernetesAdapter::new(
            KubernetesSettings {
                api_url: Some("http://127.0.0.1:1".to_string()),
                namespace: Some("jobs".to_string()),
                ..KubernetesSettings::default()
            },
            false,
        )
        .unwrap();

        assert_eq!(adapter.configuration_errors(), vec!["deployment is required"]);
    }
}
