use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::owned_project;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::auth::Whitelisted;
use crate::dedup::LifecycleError;
use crate::storage::models::{ApiKey, Project, StorageTotals};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub api_keys: Vec<ApiKey>,
}

#[derive(Debug, Serialize)]
pub struct DeleteProjectResponse {
    pub files_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
) -> Result<Json<JSend<Vec<Project>>>, ApiError> {
    let projects = state.db.list_projects(&identity.uid)?;
    Ok(JSend::success(projects))
}

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
    AppJson(req): AppJson<CreateProjectRequest>,
) -> Result<(StatusCode, Json<JSend<Project>>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }

    // API keys resolve their owner, so the user row must exist before any key does
    state.db.get_or_create_user(&identity.uid, &identity.email)?;

    let description = req
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    let project = state.db.create_project(name, description, &identity.uid)?;

    tracing::debug!(project_id = project.id, owner = %identity.uid, "Created project");
    Ok((StatusCode::CREATED, JSend::success(project)))
}

pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
    Path(project_id): Path<u64>,
) -> Result<Json<JSend<ProjectDetail>>, ApiError> {
    let project = owned_project(
        &state,
        project_id,
        &identity.uid,
        "Not authorized to access this project",
    )?;
    let api_keys = state.db.list_project_api_keys(project.id)?;

    Ok(JSend::success(ProjectDetail { project, api_keys }))
}

/// Deletes the project, its API keys and its files. Files go through the
/// lifecycle one at a time so shared objects survive.
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
    Path(project_id): Path<u64>,
) -> Result<Json<JSend<DeleteProjectResponse>>, ApiError> {
    let project = owned_project(
        &state,
        project_id,
        &identity.uid,
        "Not authorized to delete this project",
    )?;

    let mut files_deleted = 0;
    for file in state.db.list_project_files(project.id)? {
        match state.files.remove_file(&file.id).await {
            Ok(_) => files_deleted += 1,
            // Raced with another delete
            Err(LifecycleError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if !state.db.delete_project(project.id)? {
        return Err(ApiError::not_found("Project not found"));
    }

    tracing::info!(project_id = project.id, files_deleted, "Deleted project");
    Ok(JSend::success(DeleteProjectResponse { files_deleted }))
}

pub async fn project_stats(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
    Path(project_id): Path<u64>,
) -> Result<Json<JSend<StorageTotals>>, ApiError> {
    let project = owned_project(
        &state,
        project_id,
        &identity.uid,
        "Not authorized to access this project",
    )?;
    let totals = state.db.project_storage_totals(project.id)?;
    Ok(JSend::success(totals))
}
