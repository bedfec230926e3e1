use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::remote::{
    Artifact, ArtifactFetcher, BackgroundRemovalBackend, OptimizeBackend, PredictionStatus,
    RemoteError, RemoteOperation,
};
use super::step::{BackgroundRemovalOptions, OptimizeOptions, StepKind, StepOptions};
use crate::storage::{mime_for_path, FileStore};

/// Fixed wait between status checks and the attempt ceiling for prediction jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

pub struct OptimizeOperation {
    backend: Arc<dyn OptimizeBackend>,
    fetcher: Arc<dyn ArtifactFetcher>,
    files: Arc<dyn FileStore>,
}

impl OptimizeOperation {
    pub fn new(
        backend: Arc<dyn OptimizeBackend>,
        fetcher: Arc<dyn ArtifactFetcher>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            backend,
            fetcher,
            files,
        }
    }

    async fn optimize(
        &self,
        input: &Path,
        options: &OptimizeOptions,
    ) -> Result<Artifact, RemoteError> {
        let original_size = input_size(input).await?;
        if !self.files.is_image(input) {
            return Err(RemoteError::UnsupportedInput(input.to_path_buf()));
        }

        let outcome = self.backend.optimize(input, options).await?;
        let extension = outcome
            .format
            .as_deref()
            .and_then(known_extension)
            .or_else(|| {
                input
                    .extension()
                    .and_then(|v| v.to_str())
                    .and_then(known_extension)
            })
            .unwrap_or("jpg");
        let dest = self.files.temp_path(extension);
        let size = fetch_or_discard(
            self.fetcher.as_ref(),
            self.files.as_ref(),
            outcome.optimized_url.as_str(),
            dest.as_path(),
        )
        .await?;

        Ok(Artifact {
            path: dest,
            size,
            original_size,
            format: outcome.format,
            savings_percent: outcome.savings_percent,
        })
    }
}

#[async_trait]
impl RemoteOperation for OptimizeOperation {
    fn kind(&self) -> StepKind {
        StepKind::Optimize
    }

    async fn execute(&self, input: &Path, options: &StepOptions) -> Result<Artifact, RemoteError> {
        let StepOptions::Optimize(options) = options else {
            return Err(RemoteError::OptionsMismatch {
                expected: StepKind::Optimize,
                actual: options.kind(),
            });
        };
        let result = self.optimize(input, options).await;
        match result.as_ref() {
            Ok(artifact) => info!(
                input = %input.display(),
                output = %artifact.path.display(),
                size = artifact.size,
                original_size = artifact.original_size,
                "optimize step finished"
            ),
            Err(err) => warn!(
                input = %input.display(),
                error = %err,
                code = err.code(),
                "optimize step failed"
            ),
        }
        result
    }
}

pub struct RemoveBackgroundOperation {
    backend: Arc<dyn BackgroundRemovalBackend>,
    fetcher: Arc<dyn ArtifactFetcher>,
    files: Arc<dyn FileStore>,
    poll: PollPolicy,
}

impl RemoveBackgroundOperation {
    pub fn new(
        backend: Arc<dyn BackgroundRemovalBackend>,
        fetcher: Arc<dyn ArtifactFetcher>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            backend,
            fetcher,
            files,
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    async fn remove_background(
        &self,
        input: &Path,
        options: &BackgroundRemovalOptions,
    ) -> Result<Artifact, RemoteError> {
        let original_size = input_size(input).await?;
        let bytes = tokio::fs::read(input).await.map_err(RemoteError::Io)?;
        let mime = image::guess_format(bytes.as_slice())
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| mime_for_path(input));
        let data_uri = format!(
            "data:{mime};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes.as_slice())
        );

        let prediction_id = self.backend.submit(data_uri.as_str(), options).await?;
        debug!(prediction_id = %prediction_id, "prediction submitted");
        let output_url = self.wait_for_output(prediction_id.as_str()).await?;

        let dest = self.files.temp_path("png");
        let size = fetch_or_discard(
            self.fetcher.as_ref(),
            self.files.as_ref(),
            output_url.as_str(),
            dest.as_path(),
        )
        .await?;

        Ok(Artifact {
            path: dest,
            size,
            original_size,
            format: None,
            savings_percent: None,
        })
    }

    async fn wait_for_output(&self, prediction_id: &str) -> Result<String, RemoteError> {
        for attempt in 1..=self.poll.max_attempts {
            let prediction = self.backend.poll(prediction_id).await?;
            debug!(prediction_id, attempt, status = ?prediction.status, "prediction polled");
            match prediction.status {
                PredictionStatus::Succeeded => {
                    return match prediction.output {
                        Some(Value::String(url)) => Ok(url),
                        _ => Err(RemoteError::RemoteRejected(String::from(
                            "Invalid output from background removal model",
                        ))),
                    };
                }
                PredictionStatus::Failed | PredictionStatus::Canceled => {
                    let reason = match prediction.error {
                        Some(Value::String(message)) => message,
                        Some(Value::Null) | None => String::from("Unknown error"),
                        Some(other) => other.to_string(),
                    };
                    return Err(RemoteError::RemoteRejected(format!(
                        "Background removal failed: {reason}"
                    )));
                }
                PredictionStatus::Starting
                | PredictionStatus::Processing
                | PredictionStatus::Unknown => {}
            }
            if attempt < self.poll.max_attempts {
                tokio::time::sleep(self.poll.interval).await;
            }
        }
        Err(RemoteError::Timeout {
            attempts: self.poll.max_attempts,
        })
    }
}

#[async_trait]
impl RemoteOperation for RemoveBackgroundOperation {
    fn kind(&self) -> StepKind {
        StepKind::RemoveBackground
    }

    async fn execute(&self, input: &Path, options: &StepOptions) -> Result<Artifact, RemoteError> {
        let StepOptions::RemoveBackground(options) = options else {
            return Err(RemoteError::OptionsMismatch {
                expected: StepKind::RemoveBackground,
                actual: options.kind(),
            });
        };
        let result = self.remove_background(input, options).await;
        match result.as_ref() {
            Ok(artifact) => info!(
                input = %input.display(),
                output = %artifact.path.display(),
                size = artifact.size,
                "remove_background step finished"
            ),
            Err(err) => warn!(
                input = %input.display(),
                error = %err,
                code = err.code(),
                "remove_background step failed"
            ),
        }
        result
    }
}

async fn input_size(input: &Path) -> Result<u64, RemoteError> {
    match tokio::fs::metadata(input).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(RemoteError::InputNotFound(input.to_path_buf())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(RemoteError::InputNotFound(input.to_path_buf()))
        }
        Err(err) => Err(RemoteError::Io(err)),
    }
}

/// Downloads into `dest`, removing whatever was written if the fetch fails.
async fn fetch_or_discard(
    fetcher: &dyn ArtifactFetcher,
    files: &dyn FileStore,
    url: &str,
    dest: &Path,
) -> Result<u64, RemoteError> {
    match fetcher.fetch(url, dest).await {
        Ok(size) => Ok(size),
        Err(err) => {
            files.delete(dest);
            Err(err)
        }
    }
}

/// Maps a reported format (`"JPEG"`, `".png"`, `"image/webp"`) onto a file extension.
/// Anything outside the known image set yields `None`; the raw value stays metadata only.
fn known_extension(raw: &str) -> Option<&'static str> {
    let name = raw.rsplit('/').next().unwrap_or(raw);
    let name = name.trim().trim_start_matches('.').to_ascii_lowercase();
    match name.as_str() {
        "jpg" | "jpeg" => Some("jpg"),
        "png" => Some("png"),
        "webp" => Some("webp"),
        "gif" => Some("gif"),
        _ => None,
    }
}
