use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::api::server::AppState;
use crate::api::session::SessionId;
use crate::pipeline::registry::{ResultRecord, UploadRecord};
use crate::pipeline::service::ProcessOperation;
use crate::storage::LocalFileStore;

use super::handler_utils::{
    bad_request, internal_error, into_json, map_pipeline_error, map_storage_error, not_found,
    ApiObject,
};
use super::results::ResultView;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessInput {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default, rename = "fileId", alias = "file_id")]
    pub file_id: Option<String>,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub steps: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct UploadView {
    #[serde(flatten)]
    upload: UploadRecord,
    thumbnail_url: Option<String>,
}

impl UploadView {
    fn new(upload: UploadRecord) -> Self {
        let thumbnail_url = upload
            .thumbnail
            .as_ref()
            .map(|_| format!("/api/uploads/{}/thumbnail", upload.id));
        Self {
            upload,
            thumbnail_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct UploadResponse {
    ok: bool,
    file: UploadView,
}

#[derive(Debug, Clone, Serialize)]
struct ProcessResponse {
    ok: bool,
    result: ResultView,
}

pub async fn upload_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    mut multipart: Multipart,
) -> ApiObject<Value> {
    let (file_name, bytes) = match read_file_field(&mut multipart).await {
        Ok(Some(file)) => file,
        Ok(None) => return bad_request("missing_file", "No file uploaded"),
        Err(message) => return bad_request("invalid_upload", message),
    };

    let files = state.files.clone();
    let stored = tokio::task::spawn_blocking(move || {
        let stored = files.store_upload(bytes.as_ref(), file_name.as_str())?;
        let thumbnail = thumbnail_or_warn(files.as_ref(), stored.path.as_path());
        Ok::<_, crate::storage::StorageError>((stored, thumbnail))
    })
    .await;

    let (stored, thumbnail) = match stored {
        Ok(Ok(stored)) => stored,
        Ok(Err(err)) => return map_storage_error(err),
        Err(join_error) => return internal_error(format!("upload task failed: {join_error}")),
    };

    let upload = UploadRecord {
        id: stored.id,
        name: stored.name,
        path: stored.path,
        size: stored.size,
        mime: stored.mime,
        thumbnail,
    };
    info!(session = %session.as_str(), file_id = %upload.id, size = upload.size, "upload stored");
    state
        .registry
        .register_upload(session.as_str(), upload.clone());

    (
        StatusCode::OK,
        into_json(UploadResponse {
            ok: true,
            file: UploadView::new(upload),
        }),
    )
}

pub async fn upload_thumbnail_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    UrlPath(id): UrlPath<String>,
) -> Response {
    let thumbnail = state
        .registry
        .find_upload(session.as_str(), id.as_str())
        .and_then(|upload| upload.thumbnail);
    match thumbnail {
        Some(path) => png_file_response(path.as_path()).await,
        None => not_found("Thumbnail not found").into_response(),
    }
}

pub async fn process_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Json(payload): Json<ProcessInput>,
) -> ApiObject<Value> {
    let (Some(operation_raw), Some(file_id)) = (
        payload.operation.as_deref().filter(|v| !v.trim().is_empty()),
        payload.file_id.as_deref().filter(|v| !v.trim().is_empty()),
    ) else {
        return bad_request("missing_parameters", "Missing required parameters");
    };
    let Some(operation) = ProcessOperation::parse(operation_raw) else {
        return bad_request(
            "unsupported_operation",
            format!("Unsupported operation: {operation_raw}"),
        );
    };
    let Some(upload) = state.registry.find_upload(session.as_str(), file_id) else {
        return not_found("File not found");
    };

    let outcome = state
        .pipeline
        .process(
            operation,
            upload.path.as_path(),
            payload.options.as_ref(),
            payload.steps.as_ref(),
        )
        .await;
    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            warn!(
                session = %session.as_str(),
                file_id,
                operation = operation.as_str(),
                error = %err,
                "processing failed"
            );
            return map_pipeline_error(&err);
        }
    };

    let artifact = result.final_artifact;
    let files = state.files.clone();
    let artifact_path = artifact.path.clone();
    let thumbnail = tokio::task::spawn_blocking(move || {
        thumbnail_or_warn(files.as_ref(), artifact_path.as_path())
    })
    .await
    .unwrap_or_else(|join_error| {
        warn!(error = %join_error, "thumbnail task failed");
        None
    });

    let record = ResultRecord {
        id: ResultRecord::new_id(),
        original_id: upload.id.clone(),
        name: result_name(operation, upload.name.as_str(), artifact.path.as_path()),
        path: artifact.path,
        operation: operation.as_str().to_string(),
        timestamp: Utc::now().timestamp(),
        thumbnail,
        size: artifact.size,
        original_size: upload.size,
        savings_percent: artifact.savings_percent,
        format: artifact.format,
    };
    info!(
        session = %session.as_str(),
        result_id = %record.id,
        operation = operation.as_str(),
        steps = result.steps_completed,
        "result registered"
    );
    state
        .registry
        .register_result(session.as_str(), record.clone());

    (
        StatusCode::OK,
        into_json(ProcessResponse {
            ok: true,
            result: ResultView::new(record),
        }),
    )
}

async fn read_file_field(
    multipart: &mut Multipart,
) -> Result<Option<(String, Bytes)>, String> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Malformed upload: {e}"))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| format!("Upload failed: {e}"))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        return Ok(Some((file_name, bytes)));
    }
    Ok(None)
}

fn thumbnail_or_warn(files: &LocalFileStore, path: &Path) -> Option<PathBuf> {
    match files.generate_thumbnail(path) {
        Ok(thumbnail) => Some(thumbnail),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "thumbnail generation failed");
            None
        }
    }
}

fn result_name(operation: ProcessOperation, original_name: &str, result_path: &Path) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|v| v.to_str())
        .unwrap_or("image");
    let extension = result_path
        .extension()
        .and_then(|v| v.to_str())
        .unwrap_or("jpg");
    format!("{}_{stem}.{extension}", operation.as_str())
}

pub(crate) async fn png_file_response(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/png")],
            bytes,
        )
            .into_response(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            not_found("Thumbnail not found").into_response()
        }
        Err(err) => internal_error(format!("thumbnail read failed: {err}")).into_response(),
    }
}
