use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::sync::Arc;

use super::set_inline_disposition;
use crate::api::response::ApiError;
use crate::dedup::LifecycleError;
use crate::imgproxy::Transform;
use crate::object_store::Locator;
use crate::storage::models::FileRecord;
use crate::AppState;

const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(30);
const CACHE_CONTROL: &str = "public, max-age=3600";

/// Serve file content by id.
/// Route: GET /files/:file_id
pub async fn serve_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let file = state
        .db
        .get_file(&file_id)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let data = read_stored(&state, &file).await?;
    Ok(file_response(&file, data))
}

/// A 120px-high webp rendition from imgproxy. Legacy local files are served
/// as they are.
/// Route: GET /files/:file_id/thumbnail
pub async fn serve_thumbnail(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let file = state
        .db
        .get_file(&file_id)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    if !file.mime_type.starts_with("image/") {
        return Err(ApiError::bad_request(
            "Thumbnails are only available for image files",
        ));
    }

    let key = match Locator::parse(&file.storage_locator)? {
        Locator::Object { key, .. } => key,
        Locator::LocalPath(_) => {
            let data = read_stored(&state, &file).await?;
            return Ok(file_response(&file, data));
        }
    };

    let url = state.imgproxy.url(key, Transform::thumbnail());
    let resp = state
        .http
        .get(&url)
        .timeout(THUMBNAIL_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(file_id = %file.id, error = %e, "Thumbnail service unreachable");
            ApiError::unavailable("Thumbnail service unavailable")
        })?;

    let status = resp.status();
    if status != reqwest::StatusCode::OK {
        tracing::warn!(file_id = %file.id, key = %key, status = %status, "Thumbnail service error");
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::not_found("Thumbnail not found"));
        }
        return Err(ApiError::bad_gateway("Thumbnail service error"));
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or(HeaderValue::from_static("image/webp"));

    let body = resp.bytes().await.map_err(|e| {
        tracing::warn!(file_id = %file.id, error = %e, "Failed to read thumbnail");
        ApiError::internal("failed to read thumbnail")
    })?;

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    set_inline_disposition(&mut response, &format!("thumbnail_{}", file.filename));

    Ok(response)
}

async fn read_stored(state: &AppState, file: &FileRecord) -> Result<Bytes, ApiError> {
    state.files.read_file(file).await.map_err(|e| match e {
        LifecycleError::NotFound => ApiError::not_found("File not found on storage"),
        other => other.into(),
    })
}

/// File bytes with the record's type, name and length.
pub(super) fn file_response(file: &FileRecord, data: Bytes) -> Response {
    let length = data.len() as u64;
    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        file.mime_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
    set_inline_disposition(&mut response, &file.filename);

    response
}
