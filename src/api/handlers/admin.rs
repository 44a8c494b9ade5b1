use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::dedup::LifecycleError;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub files_deleted: u64,
    pub projects_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health() -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Release every file through the lifecycle so stored objects go too, then
/// wipe the remaining tables.
pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    let mut files_deleted = 0;
    for file in state.db.get_all_files()? {
        match state.files.remove_file(&file.id).await {
            Ok(_) => files_deleted += 1,
            Err(LifecycleError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let stats = state.db.purge_all()?;

    tracing::warn!(
        files = files_deleted + stats.files,
        projects = stats.projects,
        "Purged all data"
    );

    Ok(JSend::success(PurgeResponse {
        files_deleted: files_deleted + stats.files,
        projects_deleted: stats.projects,
    }))
}
