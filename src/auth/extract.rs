use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;

use super::{bearer_token, AuthError, Identity, WHITELISTED};
use crate::api::response::ApiError;
use crate::storage::models::{ApiKey, Project, User};
use crate::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Any caller with a valid bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

/// A bearer-token caller holding the `whitelisted` (or `developer`) role.
#[derive(Debug, Clone)]
pub struct Whitelisted(pub Identity);

/// What an `X-API-Key` header resolves to.
#[derive(Debug, Clone)]
pub struct ApiKeyContext {
    pub user: User,
    pub project: Project,
    pub api_key: ApiKey,
}

#[derive(Debug, Clone)]
pub struct ApiKeyAuth(pub ApiKeyContext);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = bearer_token(header)?;

        let identity = tokio::time::timeout(state.config.request_timeout, state.verifier.verify(token))
            .await
            .map_err(|_| ApiError::unavailable("Identity provider did not respond in time"))?
            .map_err(|e| {
                tracing::debug!(error = %e, path = %parts.uri.path(), "Rejected bearer token");
                e
            })?;

        Ok(CurrentUser(identity))
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Whitelisted {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        let CurrentUser(identity) = CurrentUser::from_request_parts(parts, state).await?;
        identity.require_role(WHITELISTED)?;
        Ok(Whitelisted(identity))
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for ApiKeyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        if let Some(context) = parts.extensions.get::<ApiKeyContext>() {
            return Ok(ApiKeyAuth(context.clone()));
        }

        let value = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingApiKey)?;

        let api_key = state
            .db
            .find_active_api_key(value)?
            .ok_or(AuthError::InvalidApiKey)?;

        if let Err(e) = state.db.touch_api_key(api_key.id, Utc::now()) {
            tracing::warn!(api_key_id = api_key.id, error = %e, "Failed to update last_used_at");
        }

        let user = state
            .db
            .get_user(&api_key.owner_id)?
            .ok_or_else(|| ApiError::unauthorized("API key is invalid (missing user)"))?;
        let project = state
            .db
            .get_project(api_key.project_id)?
            .ok_or_else(|| ApiError::unauthorized("API key is invalid (missing project)"))?;

        let context = ApiKeyContext {
            user,
            project,
            api_key,
        };
        parts.extensions.insert(context.clone());
        Ok(ApiKeyAuth(context))
    }
}
