mod download;
mod optimize_api;
mod replicate_api;

use std::time::Duration;

use reqwest::{Client, Response};

use super::remote::RemoteError;

pub use download::HttpArtifactFetcher;
pub use optimize_api::OptimizeApiClient;
pub use replicate_api::{ReplicateClient, DEFAULT_REMBG_MODEL_VERSION, DEFAULT_REPLICATE_BASE_URL};

pub const OPTIMIZE_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const PREDICTION_CREATE_TIMEOUT: Duration = Duration::from_secs(30);
pub const PREDICTION_POLL_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Result<Client, RemoteError> {
    Client::builder()
        .build()
        .map_err(|e| RemoteError::RemoteUnavailable(format!("http client init failed: {e}")))
}

fn join_endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn transport_error(service: &str, err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        return RemoteError::RemoteUnavailable(format!("{service} request timed out: {err}"));
    }
    RemoteError::RemoteUnavailable(format!("{service} request failed: {err}"))
}

/// Turns a >= 400 response into `RemoteRejected`, keeping the body for diagnostics.
async fn reject_error_status(service: &str, resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        let body = resp.text().await.unwrap_or_default();
        return Err(RemoteError::RemoteRejected(format!(
            "{service} returned HTTP {}: {}",
            status.as_u16(),
            body.trim()
        )));
    }
    Ok(resp)
}
