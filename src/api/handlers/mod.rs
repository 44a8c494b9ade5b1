mod admin;
mod api_files;
mod api_keys;
mod frontend_files;
mod me;
mod projects;
mod public_files;
mod upload;
mod usage;

use axum::http::{header, HeaderValue};
use axum::response::Response;

use crate::api::response::ApiError;
use crate::storage::models::Project;
use crate::AppState;

pub use admin::{admin_purge, health};
pub use api_files::{
    api_delete_file, api_download_file, api_list_files, api_transform_url, api_upload_file,
};
pub use api_keys::{create_api_key, delete_api_key, list_api_keys, verify_api_key};
pub use frontend_files::{frontend_delete_file, frontend_list_files, frontend_upload_file};
pub use me::get_me;
pub use projects::{create_project, delete_project, get_project, list_projects, project_stats};
pub use public_files::{serve_file, serve_thumbnail};
pub use usage::{dashboard_stats, storage_stats, usage_details, usage_stats};

/// Load a project the caller owns. Missing projects are `not_found`, projects
/// owned by someone else are `forbidden`.
fn owned_project(
    state: &AppState,
    project_id: u64,
    uid: &str,
    forbidden: &str,
) -> Result<Project, ApiError> {
    let project = state
        .db
        .get_project(project_id)?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

    if project.owner_id != uid {
        return Err(ApiError::forbidden(forbidden));
    }
    Ok(project)
}

/// `inline; filename="..."`, dropping characters that would break the header.
fn set_inline_disposition(response: &mut Response, filename: &str) {
    let safe: String = filename
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{safe}\"")) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
}
