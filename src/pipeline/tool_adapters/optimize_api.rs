use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::{
    http_client, join_endpoint, reject_error_status, transport_error, OPTIMIZE_REQUEST_TIMEOUT,
};
use crate::pipeline::remote::{OptimizeBackend, OptimizeOutcome, RemoteError};
use crate::pipeline::step::OptimizeOptions;
use crate::storage::mime_for_path;

const SERVICE: &str = "optimization API";

/// Client for the synchronous optimization HTTP API (`POST <base>/optimize`).
#[derive(Debug, Clone)]
pub struct OptimizeApiClient {
    http: Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct OptimizeApiResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    optimized_url: Option<String>,
    #[serde(default)]
    savings_percent: Option<f64>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

impl OptimizeApiClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, RemoteError> {
        Ok(Self {
            http: http_client()?,
            endpoint: join_endpoint(base_url, "optimize"),
            api_key: api_key.into(),
            timeout: OPTIMIZE_REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    async fn build_form(
        &self,
        input: &Path,
        options: &OptimizeOptions,
    ) -> Result<multipart::Form, RemoteError> {
        let bytes = tokio::fs::read(input).await.map_err(RemoteError::Io)?;
        let file_name = input
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("image.jpg")
            .to_string();
        let mime = mime_for_path(input);
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.as_str())
            .map_err(|e| RemoteError::RemoteRejected(format!("invalid mime '{mime}': {e}")))?;

        let mut form = multipart::Form::new()
            .text("api_key", self.api_key.clone())
            .part("image", part)
            .text("quality", options.quality.to_string())
            .text("format", options.format.as_str())
            .text(
                "strip_metadata",
                if options.strip_metadata { "1" } else { "0" },
            );
        if let Some(resize) = options.resize {
            form = form.text("resize", resize.to_string());
        }
        Ok(form)
    }
}

#[async_trait]
impl OptimizeBackend for OptimizeApiClient {
    async fn optimize(
        &self,
        input: &Path,
        options: &OptimizeOptions,
    ) -> Result<OptimizeOutcome, RemoteError> {
        let form = self.build_form(input, options).await?;
        let resp = self
            .http
            .post(self.endpoint.as_str())
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let resp = reject_error_status(SERVICE, resp).await?;
        let payload: OptimizeApiResponse = resp.json().await.map_err(|e| {
            RemoteError::RemoteRejected(format!("failed to parse {SERVICE} response: {e}"))
        })?;

        if payload.success != Some(true) {
            let message = payload
                .error
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| String::from("Unknown optimization error"));
            return Err(RemoteError::RemoteRejected(format!(
                "Optimization failed: {message}"
            )));
        }
        let optimized_url = payload
            .optimized_url
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                RemoteError::RemoteRejected(String::from(
                    "Optimization succeeded without an optimized_url",
                ))
            })?;

        Ok(OptimizeOutcome {
            optimized_url,
            savings_percent: payload.savings_percent,
            format: payload.format,
        })
    }
}
