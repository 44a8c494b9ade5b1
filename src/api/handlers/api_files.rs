use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::public_files::file_response;
use super::upload::receive_upload;
use crate::api::response::{ApiError, AppQuery, JSend};
use crate::auth::ApiKeyAuth;
use crate::dedup::NewFile;
use crate::imgproxy::{OutputFormat, Preset, ResizeMode, Transform, DEFAULT_DIMENSION, MAX_DIMENSION};
use crate::object_store::{Locator, ObjectStoreError};
use crate::storage::models::FileRecord;
use crate::AppState;

const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);
const MAX_KEY_LEN: usize = 2048;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file: FileRecord,
    /// Object key, absent when the content is shared with a legacy local file
    pub key: Option<String>,
    pub bucket: String,
    pub size: u64,
    pub content_type: String,
    pub imgproxy_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub imgproxy_url: String,
}

#[derive(Debug, Deserialize)]
pub struct TransformParams {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub w: Option<i64>,
    #[serde(default)]
    pub h: Option<i64>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransformResponse {
    pub url: String,
    pub mode: ResizeMode,
    pub width: u32,
    pub height: u32,
    pub format: OutputFormat,
    pub preset: Option<Preset>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn api_upload_file(
    State(state): State<Arc<AppState>>,
    ApiKeyAuth(ctx): ApiKeyAuth,
    multipart: Multipart,
) -> Result<(StatusCode, Json<JSend<UploadResponse>>), ApiError> {
    let received = receive_upload(&state, multipart).await?;

    let used = state.db.owner_storage_totals(&ctx.user.uid)?.total_storage;
    let record = state
        .files
        .store_file(
            &received.upload,
            NewFile {
                filename: received.filename,
                mime_type: received.mime_type,
                project_id: ctx.project.id,
                owner_id: ctx.user.uid.clone(),
            },
            Some(used),
        )
        .await?;

    let key = match Locator::parse(&record.storage_locator)? {
        Locator::Object { key, .. } => Some(key.to_string()),
        Locator::LocalPath(_) => None,
    };
    let imgproxy_url = key
        .as_deref()
        .filter(|_| record.mime_type.starts_with("image/"))
        .map(|k| state.imgproxy.preview_url(k));

    Ok((
        StatusCode::CREATED,
        JSend::success(UploadResponse {
            key,
            bucket: state.object_store.bucket().to_string(),
            size: record.size,
            content_type: record.mime_type.clone(),
            imgproxy_url,
            file: record,
        }),
    ))
}

/// Objects under the key's project. `prefix` narrows the listing and is
/// taken relative to the project unless it already starts with it.
pub async fn api_list_files(
    State(state): State<Arc<AppState>>,
    ApiKeyAuth(ctx): ApiKeyAuth,
    AppQuery(params): AppQuery<ListParams>,
) -> Result<Json<JSend<Vec<ListedObject>>>, ApiError> {
    let scope = state.project_key_prefix(ctx.project.id);
    let prefix = match params.prefix.as_deref().map(|p| p.trim_start_matches('/')) {
        Some(p) if p.starts_with(&scope) => p.to_string(),
        Some(p) => format!("{scope}{p}"),
        None => scope,
    };

    let objects = tokio::time::timeout(state.config.request_timeout, state.object_store.list(&prefix))
        .await
        .map_err(|_| ObjectStoreError::Timeout(state.config.request_timeout))??;

    let items = objects
        .into_iter()
        .map(|o| ListedObject {
            imgproxy_url: state.imgproxy.preview_url(&o.key),
            key: o.key,
            size: o.size,
            etag: o.etag,
            last_modified: o.last_modified,
        })
        .collect();

    Ok(JSend::success(items))
}

/// Signed imgproxy URL for a file (`file_id`) or a raw key (`key`) in the
/// key's project.
pub async fn api_transform_url(
    State(state): State<Arc<AppState>>,
    ApiKeyAuth(ctx): ApiKeyAuth,
    AppQuery(params): AppQuery<TransformParams>,
) -> Result<Json<JSend<TransformResponse>>, ApiError> {
    let key = match (params.file_id.as_deref(), params.key.as_deref()) {
        (Some(file_id), _) if !file_id.is_empty() => {
            let file = project_file(&state, ctx.project.id, file_id)?;
            match Locator::parse(&file.storage_locator)? {
                Locator::Object { key, .. } => key.to_string(),
                Locator::LocalPath(_) => {
                    return Err(ApiError::bad_request("File is not stored in object storage"))
                }
            }
        }
        (_, Some(key)) if !key.is_empty() => {
            if key.len() > MAX_KEY_LEN {
                return Err(ApiError::bad_request("key is too long"));
            }
            let key = key.trim_start_matches('/');
            let scope = state.project_key_prefix(ctx.project.id);
            if !key.starts_with(&scope) || key.split('/').any(|s| s == "..") {
                return Err(ApiError::forbidden("key is outside this project"));
            }
            key.to_string()
        }
        _ => return Err(ApiError::bad_request("key or file_id is required")),
    };

    let transform = transform_from(&params)?;
    let preset = match params.preset.as_deref().filter(|p| !p.is_empty()) {
        Some(p) => Some(p.parse().map_err(|_| ApiError::bad_request("invalid preset"))?),
        None => None,
    };

    Ok(JSend::success(TransformResponse {
        url: state.imgproxy.url(&key, transform),
        mode: transform.mode,
        width: transform.width,
        height: transform.height,
        format: transform.format,
        preset,
    }))
}

/// Redirects to a short-lived direct download URL, or streams the bytes when
/// the backend cannot sign one.
pub async fn api_download_file(
    State(state): State<Arc<AppState>>,
    ApiKeyAuth(ctx): ApiKeyAuth,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let file = project_file(&state, ctx.project.id, &file_id)?;

    if let Some(url) = state.files.presign(&file, DOWNLOAD_URL_TTL).await? {
        return Ok(Redirect::temporary(&url).into_response());
    }

    let data = state.files.read_file(&file).await?;
    Ok(file_response(&file, data))
}

pub async fn api_delete_file(
    State(state): State<Arc<AppState>>,
    ApiKeyAuth(ctx): ApiKeyAuth,
    Path(file_id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    let file = project_file(&state, ctx.project.id, &file_id)?;
    state.files.remove_file(&file.id).await?;

    tracing::debug!(file_id = %file.id, api_key_id = ctx.api_key.id, "Deleted file");
    Ok(JSend::success(()))
}

// ============================================================================
// Helpers
// ============================================================================

/// A file of the given project. Files of other projects look missing.
fn project_file(state: &AppState, project_id: u64, file_id: &str) -> Result<FileRecord, ApiError> {
    state
        .db
        .get_file(file_id)?
        .filter(|f| f.project_id == project_id)
        .ok_or_else(|| ApiError::not_found("File not found"))
}

/// Unknown modes and formats fall back to the defaults; bad sizes are rejected.
fn transform_from(params: &TransformParams) -> Result<Transform, ApiError> {
    let mode = params
        .mode
        .as_deref()
        .and_then(|m| m.parse().ok())
        .unwrap_or_default();
    let format = params
        .format
        .as_deref()
        .and_then(|f| f.parse().ok())
        .unwrap_or_default();

    let (width, height) = match params.preset.as_deref().filter(|p| !p.is_empty()) {
        Some(preset) => preset
            .parse::<Preset>()
            .map_err(|_| ApiError::bad_request("invalid preset"))?
            .dimensions(),
        None => {
            let width = dimension(params.w, "invalid width")?;
            let height = dimension(params.h, "invalid height")?;
            if width > MAX_DIMENSION || height > MAX_DIMENSION {
                return Err(ApiError::bad_request("dimensions too large"));
            }
            (width, height)
        }
    };

    Ok(Transform {
        mode,
        width,
        height,
        format,
    })
}

fn dimension(value: Option<i64>, message: &str) -> Result<u32, ApiError> {
    match value {
        None => Ok(DEFAULT_DIMENSION),
        Some(v) if v > 0 => Ok(u32::try_from(v).unwrap_or(u32::MAX)),
        Some(_) => Err(ApiError::bad_request(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TransformParams {
        TransformParams {
            file_id: None,
            key: Some("uploads/1/a.png".into()),
            mode: None,
            preset: None,
            w: None,
            h: None,
            format: None,
        }
    }

    #[test]
    fn defaults_to_fit_webp_1200() {
        assert_eq!(transform_from(&params()).unwrap(), Transform::default());
    }

    #[test]
    fn unknown_mode_and_format_fall_back() {
        let mut p = params();
        p.mode = Some("crop".into());
        p.format = Some("gif".into());
        let t = transform_from(&p).unwrap();
        assert_eq!(t.mode, ResizeMode::Fit);
        assert_eq!(t.format, OutputFormat::Webp);
    }

    #[test]
    fn preset_overrides_dimensions() {
        let mut p = params();
        p.preset = Some("medium".into());
        p.w = Some(9999);
        let t = transform_from(&p).unwrap();
        assert_eq!((t.width, t.height), (0, 320));
    }

    #[test]
    fn rejects_bad_dimensions() {
        let mut p = params();
        p.w = Some(0);
        assert!(transform_from(&p).is_err());

        let mut p = params();
        p.h = Some(4001);
        assert!(transform_from(&p).is_err());

        let mut p = params();
        p.preset = Some("poster".into());
        assert!(transform_from(&p).is_err());
    }
}
