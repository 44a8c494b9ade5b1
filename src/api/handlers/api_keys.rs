use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::owned_project;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::auth::CurrentUser;
use crate::storage::models::ApiKey;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub project_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListApiKeysParams {
    #[serde(default)]
    pub project_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyApiKeyParams {
    #[serde(default)]
    pub api_key: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    CurrentUser(identity): CurrentUser,
    AppJson(req): AppJson<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<JSend<ApiKey>>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }

    owned_project(
        &state,
        req.project_id,
        &identity.uid,
        "Not authorized to create API key for this project",
    )?;
    state.db.get_or_create_user(&identity.uid, &identity.email)?;

    let api_key = state
        .db
        .create_api_key(name, &identity.uid, req.project_id)?;

    tracing::debug!(
        api_key_id = api_key.id,
        project_id = api_key.project_id,
        "Created API key"
    );
    Ok((StatusCode::CREATED, JSend::success(api_key)))
}

pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    CurrentUser(identity): CurrentUser,
    AppQuery(params): AppQuery<ListApiKeysParams>,
) -> Result<Json<JSend<Vec<ApiKey>>>, ApiError> {
    if let Some(project_id) = params.project_id {
        let owned = state
            .db
            .get_project(project_id)?
            .is_some_and(|p| p.owner_id == identity.uid);
        if !owned {
            return Err(ApiError::not_found("Project not found or not owned by user"));
        }
    }

    let keys = state.db.list_api_keys(&identity.uid, params.project_id)?;
    Ok(JSend::success(keys))
}

pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    CurrentUser(identity): CurrentUser,
    Path(api_key_id): Path<u64>,
) -> Result<Json<JSend<()>>, ApiError> {
    let api_key = state
        .db
        .get_api_key(api_key_id)?
        .ok_or_else(|| ApiError::not_found("API key not found"))?;

    if api_key.owner_id != identity.uid {
        return Err(ApiError::forbidden("Not authorized to delete this API key"));
    }

    if !state.db.delete_api_key(api_key.id)? {
        return Err(ApiError::not_found("API key not found"));
    }

    tracing::debug!(api_key_id, "Deleted API key");
    Ok(JSend::success(()))
}

/// Lets the dashboard confirm a pasted key is live and belongs to the caller.
pub async fn verify_api_key(
    State(state): State<Arc<AppState>>,
    CurrentUser(identity): CurrentUser,
    AppQuery(params): AppQuery<VerifyApiKeyParams>,
) -> Result<Json<JSend<ApiKey>>, ApiError> {
    let value = params
        .api_key
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request("api_key query param is required"))?;

    let api_key = state
        .db
        .find_active_api_key(&value)?
        .filter(|k| k.owner_id == identity.uid)
        .ok_or_else(|| ApiError::not_found("API key not found or not owned by user"))?;

    Ok(JSend::success(api_key))
}
