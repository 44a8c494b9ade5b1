use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::upload::receive_upload;
use crate::api::response::{ApiError, AppQuery, JSend, JSendPaginated, Pagination};
use crate::auth::Whitelisted;
use crate::dedup::NewFile;
use crate::storage::models::FileRecord;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    pub project_id: u64,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

// ============================================================================
// Handlers
// ============================================================================

/// Multipart `file` plus a `project_id` text part.
pub async fn frontend_upload_file(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
    multipart: Multipart,
) -> Result<(StatusCode, Json<JSend<FileRecord>>), ApiError> {
    let received = receive_upload(&state, multipart).await?;

    let project_id: u64 = received
        .fields
        .get("project_id")
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ApiError::bad_request("invalid project_id"))?;

    let owned = state
        .db
        .get_project(project_id)?
        .is_some_and(|p| p.owner_id == identity.uid);
    if !owned {
        return Err(ApiError::forbidden("Not authorized to upload to this project"));
    }

    let used = state.db.owner_storage_totals(&identity.uid)?.total_storage;
    let record = state
        .files
        .store_file(
            &received.upload,
            NewFile {
                filename: received.filename,
                mime_type: received.mime_type,
                project_id,
                owner_id: identity.uid,
            },
            Some(used),
        )
        .await?;

    Ok((StatusCode::CREATED, JSend::success(record)))
}

/// Files of one project, newest first.
pub async fn frontend_list_files(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
    AppQuery(params): AppQuery<ListFilesParams>,
) -> Result<Json<JSendPaginated<FileRecord>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let owned = state
        .db
        .get_project(params.project_id)?
        .is_some_and(|p| p.owner_id == identity.uid);
    if !owned {
        return Err(ApiError::forbidden("Not authorized to access this project"));
    }

    let files = state.db.list_project_files(params.project_id)?;
    let total = files.len() as u64;
    let items: Vec<FileRecord> = files
        .into_iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
        .collect();

    Ok(JSendPaginated::success(
        items,
        Pagination {
            limit: params.limit,
            offset: params.offset,
            total,
        },
    ))
}

pub async fn frontend_delete_file(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
    Path(file_id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    let file = state
        .db
        .get_file(&file_id)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    if file.owner_id != identity.uid {
        return Err(ApiError::forbidden("Not authorized to delete this file"));
    }

    state.files.remove_file(&file.id).await?;

    tracing::debug!(file_id = %file.id, "Deleted file");
    Ok(JSend::success(()))
}
