use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    http_client, join_endpoint, reject_error_status, transport_error, PREDICTION_CREATE_TIMEOUT,
    PREDICTION_POLL_TIMEOUT,
};
use crate::pipeline::remote::{BackgroundRemovalBackend, Prediction, RemoteError};
use crate::pipeline::step::BackgroundRemovalOptions;

pub const DEFAULT_REPLICATE_BASE_URL: &str = "https://api.replicate.com/v1";
pub const DEFAULT_REMBG_MODEL_VERSION: &str =
    "535fd87bc8a2afd91b382a2a16125d09a107f97b521de6d7a19571764dd757a5";

const SERVICE: &str = "prediction API";

/// Prediction-job client for a Replicate-style model host.
#[derive(Debug, Clone)]
pub struct ReplicateClient {
    http: Client,
    base_url: String,
    api_token: String,
    model_version: String,
    create_timeout: Duration,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CreatedPrediction {
    #[serde(default)]
    id: Option<String>,
}

impl ReplicateClient {
    pub fn new(
        base_url: &str,
        api_token: impl Into<String>,
        model_version: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            http: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            model_version: model_version.into(),
            create_timeout: PREDICTION_CREATE_TIMEOUT,
            poll_timeout: PREDICTION_POLL_TIMEOUT,
        })
    }

    pub fn model_version(&self) -> &str {
        self.model_version.as_str()
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.api_token)
    }
}

#[async_trait]
impl BackgroundRemovalBackend for ReplicateClient {
    async fn submit(
        &self,
        image_data_uri: &str,
        options: &BackgroundRemovalOptions,
    ) -> Result<String, RemoteError> {
        let payload = json!({
            "version": self.model_version,
            "input": {
                "image": image_data_uri,
                "alpha_matting": options.alpha_matting,
                "alpha_matting_foreground_threshold": options.alpha_matting_foreground_threshold,
                "alpha_matting_background_threshold": options.alpha_matting_background_threshold,
                "alpha_matting_erode_size": options.alpha_matting_erode_size,
            }
        });
        let resp = self
            .http
            .post(join_endpoint(self.base_url.as_str(), "predictions"))
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .timeout(self.create_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let resp = reject_error_status(SERVICE, resp).await?;
        let created: CreatedPrediction = resp.json().await.map_err(|e| {
            RemoteError::RemoteRejected(format!("failed to parse {SERVICE} response: {e}"))
        })?;
        created
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                RemoteError::RemoteRejected(String::from("prediction response is missing an id"))
            })
    }

    async fn poll(&self, prediction_id: &str) -> Result<Prediction, RemoteError> {
        let url = join_endpoint(
            self.base_url.as_str(),
            format!("predictions/{prediction_id}").as_str(),
        );
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .timeout(self.poll_timeout)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let resp = reject_error_status(SERVICE, resp).await?;
        resp.json::<Prediction>().await.map_err(|e| {
            RemoteError::RemoteRejected(format!("failed to parse prediction status: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::remote::PredictionStatus;
    use serde_json::Value;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn submit_sends_version_input_and_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .and(header("authorization", "Token tok-123"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pred-1",
                "status": "starting"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ReplicateClient::new(server.uri().as_str(), "tok-123", "v-abc")
            .expect("client should build");
        let options = BackgroundRemovalOptions {
            alpha_matting: true,
            ..BackgroundRemovalOptions::default()
        };
        let id = client
            .submit("data:image/png;base64,AAAA", &options)
            .await
            .expect("submit should succeed");
        assert_eq!(id, "pred-1");

        let received = server
            .received_requests()
            .await
            .expect("request recording should be enabled");
        let body: Value =
            serde_json::from_slice(received[0].body.as_slice()).expect("body should be json");
        assert_eq!(body["version"], "v-abc");
        assert_eq!(body["input"]["image"], "data:image/png;base64,AAAA");
        assert_eq!(body["input"]["alpha_matting"], true);
        assert_eq!(body["input"]["alpha_matting_foreground_threshold"], 240);
        assert_eq!(body["input"]["alpha_matting_background_threshold"], 10);
        assert_eq!(body["input"]["alpha_matting_erode_size"], 10);
    }

    #[tokio::test]
    async fn submit_without_id_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"status": "starting"})))
            .mount(&server)
            .await;

        let client =
            ReplicateClient::new(server.uri().as_str(), "t", "v").expect("client should build");
        let err = client
            .submit("data:image/png;base64,AAAA", &BackgroundRemovalOptions::default())
            .await
            .expect_err("missing id should fail");
        assert!(matches!(err, RemoteError::RemoteRejected(ref m) if m.contains("missing an id")));
    }

    #[tokio::test]
    async fn submit_error_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let client =
            ReplicateClient::new(server.uri().as_str(), "t", "v").expect("client should build");
        let err = client
            .submit("data:image/png;base64,AAAA", &BackgroundRemovalOptions::default())
            .await
            .expect_err("401 should fail");
        assert!(matches!(err, RemoteError::RemoteRejected(ref m) if m.contains("HTTP 401")));
    }

    #[tokio::test]
    async fn poll_parses_status_output_and_unknown_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/predictions/pred-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pred-1",
                "status": "succeeded",
                "output": "https://replicate.delivery/out.png"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/predictions/pred-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pred-2",
                "status": "queued"
            })))
            .mount(&server)
            .await;

        let client = ReplicateClient::new(format!("{}/", server.uri()).as_str(), "t", "v")
            .expect("client should build");

        let done = client.poll("pred-1").await.expect("poll should succeed");
        assert_eq!(done.status, PredictionStatus::Succeeded);
        assert_eq!(
            done.output,
            Some(Value::String("https://replicate.delivery/out.png".to_string()))
        );

        let pending = client.poll("pred-2").await.expect("poll should succeed");
        assert_eq!(pending.status, PredictionStatus::Unknown);
        assert!(!pending.status.is_terminal());
    }
}
