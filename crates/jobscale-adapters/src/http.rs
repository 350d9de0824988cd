//! Shared request plumbing for the HTTP adapters.

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;

use crate::error::{AdapterError, AdapterResult};

/// Send a request and decode a JSON body, mapping failures onto
/// [`AdapterError`] so the retry policy can classify them.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &'static str,
    request: RequestBuilder,
) -> AdapterResult<T> {
    let response = request
        .send()
        .await
        .map_err(|e| AdapterError::Transport {
            provider,
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::Http {
            provider,
            status: status.as_u16(),
            body,
        });
    }

    response.json::<T>().await.map_err(|e| AdapterError::Decode {
        provider,
        message: e.to_string(),
    })
}

/// Bind a throwaway HTTP server on a random local port.
#[cfg(test)]
pub(crate) async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
