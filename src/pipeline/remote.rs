use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::step::{BackgroundRemovalOptions, OptimizeOptions, StepKind, StepOptions};

/// Image produced by a remote operation, stored locally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub original_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_percent: Option<f64>,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("remote service rejected the request: {0}")]
    RemoteRejected(String),
    #[error("failed to download result: {0}")]
    DownloadFailed(String),
    #[error("prediction timed out after {attempts} polling attempts")]
    Timeout { attempts: u32 },
    #[error("image file not found: {0}")]
    InputNotFound(PathBuf),
    #[error("unsupported or undecodable image: {0}")]
    UnsupportedInput(PathBuf),
    #[error("operation {expected} received options for {actual}")]
    OptionsMismatch { expected: StepKind, actual: StepKind },
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
}

impl RemoteError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RemoteUnavailable(_) => "remote_unavailable",
            Self::RemoteRejected(_) => "remote_rejected",
            Self::DownloadFailed(_) => "download_failed",
            Self::Timeout { .. } => "timeout",
            Self::InputNotFound(_) => "input_not_found",
            Self::UnsupportedInput(_) => "unsupported_input",
            Self::OptionsMismatch { .. } => "options_mismatch",
            Self::Io(_) => "io_error",
        }
    }
}

/// A network-backed image transformation the executor can dispatch a step to.
#[async_trait]
pub trait RemoteOperation: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn execute(&self, input: &Path, options: &StepOptions) -> Result<Artifact, RemoteError>;
}

pub type SharedRemoteOperation = Arc<dyn RemoteOperation>;

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOutcome {
    pub optimized_url: String,
    pub savings_percent: Option<f64>,
    pub format: Option<String>,
}

#[async_trait]
pub trait OptimizeBackend: Send + Sync {
    async fn optimize(
        &self,
        input: &Path,
        options: &OptimizeOptions,
    ) -> Result<OptimizeOutcome, RemoteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[async_trait]
pub trait BackgroundRemovalBackend: Send + Sync {
    /// Submits a prediction job and returns its id.
    async fn submit(
        &self,
        image_data_uri: &str,
        options: &BackgroundRemovalOptions,
    ) -> Result<String, RemoteError>;

    async fn poll(&self, prediction_id: &str) -> Result<Prediction, RemoteError>;
}

/// Retrieves a finished remote result into a local file.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Returns the number of bytes written to `dest`.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, RemoteError>;
}
