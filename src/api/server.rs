use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::session::session_middleware;
use crate::api::{images, results};
use crate::config::AppConfig;
use crate::pipeline::executor::PipelineExecutor;
use crate::pipeline::operations::{OptimizeOperation, RemoveBackgroundOperation};
use crate::pipeline::registry::ResultRegistry;
use crate::pipeline::remote::RemoteError;
use crate::pipeline::service::ImagePipelineService;
use crate::pipeline::tool_adapters::{HttpArtifactFetcher, OptimizeApiClient, ReplicateClient};
use crate::storage::{FileStore, LocalFileStore, StorageError, UploadLimits};

const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
const JANITOR_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to prepare uploads directory: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to build remote client: {0}")]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub files: Arc<LocalFileStore>,
    pub registry: Arc<ResultRegistry>,
    pub pipeline: Arc<ImagePipelineService>,
}

impl AppState {
    pub fn new(
        files: Arc<LocalFileStore>,
        registry: Arc<ResultRegistry>,
        pipeline: Arc<ImagePipelineService>,
    ) -> Self {
        Self {
            service_name: "imgtasks-backend",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            files,
            registry,
            pipeline,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServerError> {
        let files = Arc::new(
            LocalFileStore::new(config.uploads_dir.as_path())?
                .with_limits(UploadLimits::with_max_megabytes(config.max_upload_size_mb)),
        );
        let shared_files: Arc<dyn FileStore> = files.clone();
        let fetcher = Arc::new(HttpArtifactFetcher::new()?);
        let mut executor = PipelineExecutor::new(shared_files.clone());

        match config.optimization_base_url.as_deref() {
            Some(base_url) => {
                let client = OptimizeApiClient::new(base_url, config.optimization_api_key.as_str())?;
                info!(endpoint = client.endpoint(), "optimize operation enabled");
                executor = executor.with_operation(Arc::new(OptimizeOperation::new(
                    Arc::new(client),
                    fetcher.clone(),
                    shared_files.clone(),
                )));
            }
            None => warn!(
                "IMAGE_OPTIMIZATION_SERVICE_BASE_URL is not set; optimize steps will be rejected"
            ),
        }

        if config.replicate_api_token.is_empty() {
            warn!("REPLICATE_API_TOKEN is not set; background removal requests will be refused upstream");
        }
        let replicate = ReplicateClient::new(
            config.replicate_base_url.as_str(),
            config.replicate_api_token.as_str(),
            config.replicate_model_version.as_str(),
        )?;
        info!(
            model_version = replicate.model_version(),
            "background removal operation enabled"
        );
        executor = executor.with_operation(Arc::new(RemoveBackgroundOperation::new(
            Arc::new(replicate),
            fetcher,
            shared_files,
        )));

        Ok(Self::new(
            files,
            Arc::new(ResultRegistry::new(config.session_lifetime())),
            Arc::new(ImagePipelineService::new(executor)),
        ))
    }
}

pub fn build_router_with_state(state: AppState) -> Router {
    let body_limit = usize::try_from(state.files.limits().max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/upload", post(images::upload_handler))
        .route(
            "/api/uploads/{id}/thumbnail",
            get(images::upload_thumbnail_handler),
        )
        .route("/api/process", post(images::process_handler))
        .route("/api/results", get(results::list_results_handler))
        .route("/api/results/delete", post(results::delete_result_handler))
        .route(
            "/api/results/{id}/download",
            get(results::download_result_handler),
        )
        .route(
            "/api/results/{id}/thumbnail",
            get(results::result_thumbnail_handler),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(session_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: AppConfig) -> Result<(), ServerError> {
    let state = AppState::from_config(&config)?;
    spawn_janitor(state.clone(), config.temp_files_ttl());

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    let app = build_router_with_state(state);
    info!(
        bind = %config.bind,
        uploads = %config.uploads_dir.display(),
        "starting imgtasks-backend HTTP surface"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically drops idle sessions and stale temp files.
fn spawn_janitor(state: AppState, temp_ttl: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
        loop {
            ticker.tick().await;
            run_janitor_pass(&state, temp_ttl).await;
        }
    });
}

pub async fn run_janitor_pass(state: &AppState, temp_ttl: Duration) {
    let expired = state.registry.purge_expired(chrono::Utc::now());
    let files = state.files.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut released = 0usize;
        for path in expired.iter().flat_map(|records| records.files()) {
            if files.delete(path.as_path()) {
                released += 1;
            }
        }
        (released, files.cleanup_expired(temp_ttl))
    })
    .await;

    match outcome {
        Ok((released, Ok(stale))) => {
            if released > 0 || stale > 0 {
                info!(released, stale, "janitor pass removed files");
            }
        }
        Ok((_, Err(err))) => warn!(error = %err, "temp file cleanup failed"),
        Err(join_error) => warn!(error = %join_error, "janitor task failed"),
    }
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "active_sessions": state.registry.session_count(),
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
