//! Usage accounting for API-key routes.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequestParts, MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::auth::ApiKeyAuth;
use crate::storage::NewUsage;
use crate::AppState;

/// Authenticates the `X-API-Key` header, runs the handler and records the call
/// (route, status, latency) against the key.
///
/// The resolved key context is left in the request extensions, so the
/// handler's own `ApiKeyAuth` does not look the key up again. Requests without
/// a valid key are rejected here and are not recorded.
pub async fn track_api_usage(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let (mut parts, body) = request.into_parts();

    let ctx = match ApiKeyAuth::from_request_parts(&mut parts, &state).await {
        Ok(ApiKeyAuth(ctx)) => ctx,
        Err(e) => return e.into_response(),
    };

    let endpoint = parts
        .extensions
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let response = next.run(Request::from_parts(parts, body)).await;

    let usage = NewUsage {
        endpoint: &endpoint,
        response_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        status_code: response.status().as_u16(),
        owner_id: &ctx.user.uid,
        project_id: ctx.project.id,
        api_key_id: ctx.api_key.id,
        timestamp: Utc::now(),
    };
    if let Err(e) = state.db.record_usage(usage) {
        tracing::warn!(endpoint = %endpoint, api_key_id = ctx.api_key.id, error = %e, "Failed to record API usage");
    }

    response
}
