use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::auth::CurrentUser;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub uid: String,
    pub email: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub created_at: String,
}

/// The caller's profile, created on first sight.
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<JSend<MeResponse>>, ApiError> {
    let user = state.db.get_or_create_user(&identity.uid, &identity.email)?;

    Ok(JSend::success(MeResponse {
        uid: user.uid,
        email: user.email,
        name: identity.name,
        roles: identity.roles,
        created_at: user.created_at.to_rfc3339(),
    }))
}
