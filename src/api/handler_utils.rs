use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::api::error::ErrorKind;
use crate::pipeline::executor::ExecutionError;
use crate::pipeline::remote::RemoteError;
use crate::pipeline::service::PipelineError;
use crate::storage::StorageError;

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    error_kind: ErrorKind,
    error_code: String,
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            ok: false,
            error: message.into(),
            error_kind: kind,
            error_code: code.into(),
        }),
    )
}

pub fn bad_request(code: &str, message: impl Into<String>) -> ApiObject<Value> {
    error_response(StatusCode::BAD_REQUEST, ErrorKind::Validation, code, message)
}

pub fn not_found(message: impl Into<String>) -> ApiObject<Value> {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorKind::Validation,
        "not_found",
        message,
    )
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn map_pipeline_error(err: &PipelineError) -> ApiObject<Value> {
    match err {
        PipelineError::Validation(inner) => bad_request(inner.code(), inner.to_string()),
        PipelineError::StepsNotArray => bad_request(err.code(), err.to_string()),
        PipelineError::Execution(inner) => map_execution_error(inner),
    }
}

fn map_execution_error(err: &ExecutionError) -> ApiObject<Value> {
    let source = match err {
        ExecutionError::EmptyPipeline => return bad_request(err.code(), err.to_string()),
        ExecutionError::UnsupportedStepType { .. } => {
            error!(error = %err, "pipeline step has no registered operation");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Infra,
                err.code(),
                err.to_string(),
            );
        }
        ExecutionError::RemoteFailure { source, .. } => source,
    };

    match source {
        RemoteError::Timeout { .. } => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Provider,
            err.code(),
            err.to_string(),
        ),
        RemoteError::RemoteUnavailable(_)
        | RemoteError::RemoteRejected(_)
        | RemoteError::DownloadFailed(_) => {
            warn!(error = %err, "remote processing failed");
            error_response(
                StatusCode::BAD_GATEWAY,
                ErrorKind::Provider,
                err.code(),
                err.to_string(),
            )
        }
        RemoteError::InputNotFound(_) => not_found("File not found"),
        RemoteError::UnsupportedInput(_) => bad_request(err.code(), err.to_string()),
        RemoteError::OptionsMismatch { .. } | RemoteError::Io(_) => {
            internal_error(err.to_string())
        }
    }
}

pub fn map_storage_error(err: StorageError) -> ApiObject<Value> {
    match err {
        StorageError::TooLarge { .. } => error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Validation,
            "file_too_large",
            err.to_string(),
        ),
        StorageError::UnsupportedType(_) => bad_request("unsupported_type", err.to_string()),
        StorageError::DimensionsTooSmall { .. } | StorageError::DimensionsTooLarge { .. } => {
            bad_request("invalid_dimensions", err.to_string())
        }
        StorageError::InvalidImage(_) => bad_request("invalid_image", err.to_string()),
        StorageError::Io(source) => internal_error(format!("storage io failure: {source}")),
    }
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).unwrap_or_else(|err| {
        error!(error = %err, "api payload failed to serialize");
        json!({"ok": false, "error": "Internal server error"})
    }))
}
