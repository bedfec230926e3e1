use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::api::server::AppState;
use crate::api::session::SessionId;
use crate::pipeline::registry::ResultRecord;
use crate::storage::{mime_for_path, FileStore};

use super::handler_utils::{bad_request, internal_error, into_json, not_found, ApiObject};
use super::images::png_file_response;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteResultInput {
    #[serde(default, rename = "resultId", alias = "result_id")]
    pub result_id: Option<String>,
}

/// A result record plus the URLs a browser needs to fetch it.
#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    #[serde(flatten)]
    record: ResultRecord,
    download_url: String,
    thumbnail_url: Option<String>,
}

impl ResultView {
    pub fn new(record: ResultRecord) -> Self {
        let download_url = format!("/api/results/{}/download", record.id);
        let thumbnail_url = record
            .thumbnail
            .as_ref()
            .map(|_| format!("/api/results/{}/thumbnail", record.id));
        Self {
            record,
            download_url,
            thumbnail_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ListResultsResponse {
    ok: bool,
    count: usize,
    results: Vec<ResultView>,
}

#[derive(Debug, Clone, Serialize)]
struct DeleteResultResponse {
    ok: bool,
    result_id: String,
}

pub async fn list_results_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> ApiObject<Value> {
    let results: Vec<ResultView> = state
        .registry
        .list_results(session.as_str())
        .into_iter()
        .map(ResultView::new)
        .collect();
    (
        StatusCode::OK,
        into_json(ListResultsResponse {
            ok: true,
            count: results.len(),
            results,
        }),
    )
}

pub async fn delete_result_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    Json(payload): Json<DeleteResultInput>,
) -> ApiObject<Value> {
    let Some(result_id) = payload
        .result_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    else {
        return bad_request("missing_parameters", "Missing result ID");
    };
    let Some(record) = state
        .registry
        .remove_result(session.as_str(), result_id.as_str())
    else {
        return not_found("Result not found");
    };

    let files = state.files.clone();
    let removed = tokio::task::spawn_blocking(move || {
        let mut all_removed = files.delete(record.path.as_path());
        if let Some(thumbnail) = record.thumbnail.as_ref() {
            all_removed &= files.delete(thumbnail.as_path());
        }
        all_removed
    })
    .await;

    match removed {
        Ok(all_removed) => {
            info!(session = %session.as_str(), result_id = %result_id, all_removed, "result deleted");
            (
                StatusCode::OK,
                into_json(DeleteResultResponse {
                    ok: true,
                    result_id,
                }),
            )
        }
        Err(join_error) => internal_error(format!("result delete task failed: {join_error}")),
    }
}

pub async fn download_result_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    UrlPath(id): UrlPath<String>,
) -> Response {
    let Some(record) = state.registry.find_result(session.as_str(), id.as_str()) else {
        return not_found("Result not found").into_response();
    };
    let bytes = match tokio::fs::read(record.path.as_path()).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return not_found("Result file not found").into_response();
        }
        Err(err) => {
            return internal_error(format!("result read failed: {err}")).into_response();
        }
    };

    let mime = mime_for_path(record.path.as_path());
    let disposition = content_disposition(record.name.as_str());
    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_str()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(disposition.as_str()) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// `attachment` with an ASCII `filename` and, for other names, an RFC 5987 `filename*`.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if fallback == name {
        return format!("attachment; filename=\"{fallback}\"");
    }

    let mut encoded = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(format!("%{byte:02X}").as_str());
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

pub async fn result_thumbnail_handler(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    UrlPath(id): UrlPath<String>,
) -> Response {
    match state
        .registry
        .find_result(session.as_str(), id.as_str())
        .and_then(|record| record.thumbnail)
    {
        Some(path) => png_file_response(path.as_path()).await,
        None => not_found("Thumbnail not found").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_names_keep_a_single_quoted_filename() {
        assert_eq!(
            content_disposition("optimize_cat.png"),
            "attachment; filename=\"optimize_cat.png\""
        );
    }

    #[test]
    fn non_ascii_names_get_a_utf8_filename_star() {
        let value = content_disposition("café \"menu\".png");
        assert_eq!(
            value,
            "attachment; filename=\"caf_ _menu_.png\"; filename*=UTF-8''caf%C3%A9%20%22menu%22.png"
        );
        assert!(HeaderValue::from_str(value.as_str()).is_ok());
    }

    #[test]
    fn control_characters_never_reach_the_header() {
        let value = content_disposition("a\r\nSet-Cookie: x.png");
        assert!(!value.contains('\r') && !value.contains('\n'));
        assert!(value.contains("filename*=UTF-8''a%0D%0ASet-Cookie%3A%20x.png"));
        assert!(HeaderValue::from_str(value.as_str()).is_ok());
    }
}
