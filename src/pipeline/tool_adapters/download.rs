use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::{http_client, DOWNLOAD_TIMEOUT};
use crate::pipeline::remote::{ArtifactFetcher, RemoteError};

#[derive(Debug, Clone)]
pub struct HttpArtifactFetcher {
    http: Client,
    timeout: Duration,
}

impl HttpArtifactFetcher {
    pub fn new() -> Result<Self, RemoteError> {
        Ok(Self {
            http: http_client()?,
            timeout: DOWNLOAD_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn open_response(&self, url: &str) -> Result<Response, RemoteError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| RemoteError::DownloadFailed(format!("invalid result url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RemoteError::DownloadFailed(format!(
                "unsupported result url scheme '{}'",
                parsed.scheme()
            )));
        }
        let resp = self
            .http
            .get(parsed)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RemoteError::DownloadFailed(format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::DownloadFailed(format!(
                "HTTP {} from {url}",
                status.as_u16()
            )));
        }
        Ok(resp)
    }
}

/// Removes a download target on drop unless `keep` was called.
struct PartialDownload {
    path: PathBuf,
    armed: bool,
}

impl PartialDownload {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = std::fs::remove_file(self.path.as_path()) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove partial download");
            }
        }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, RemoteError> {
        let mut resp = self.open_response(url).await?;
        let write_failed = |e: std::io::Error| {
            RemoteError::DownloadFailed(format!("failed to write {}: {e}", dest.display()))
        };

        let partial = PartialDownload::new(dest);
        let mut file = tokio::fs::File::create(dest).await.map_err(write_failed)?;
        let mut written = 0_u64;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| RemoteError::DownloadFailed(format!("body read failed: {e}")))?
        {
            file.write_all(&chunk).await.map_err(write_failed)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_failed)?;
        drop(file);

        if written == 0 {
            return Err(RemoteError::DownloadFailed(format!("empty body from {url}")));
        }
        partial.keep();
        Ok(written)
    }
}
