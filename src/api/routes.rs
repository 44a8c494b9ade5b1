use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::track_api_usage;
use crate::AppState;

/// Room for multipart boundaries and the small text parts next to the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_size as usize + MULTIPART_OVERHEAD);

    // API-key surface; every call is accounted to the key
    let api_v1 = Router::new()
        .route(
            "/api/v1/files/upload",
            post(handlers::api_upload_file).layer(upload_limit.clone()),
        )
        .route("/api/v1/files/list", get(handlers::api_list_files))
        .route("/api/v1/files/transform-url", get(handlers::api_transform_url))
        .route(
            "/api/v1/files/:file_id",
            get(handlers::api_download_file).delete(handlers::api_delete_file),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_api_usage,
        ));

    let mut router = Router::new()
        // Profile
        .route("/me", get(handlers::get_me))
        // Projects
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/:project_id",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/projects/:project_id/stats", get(handlers::project_stats))
        // API keys
        .route(
            "/api-keys",
            get(handlers::list_api_keys).post(handlers::create_api_key),
        )
        .route("/api-keys/:api_key_id", delete(handlers::delete_api_key))
        .route(
            "/frontend/api-keys/api/verify",
            get(handlers::verify_api_key),
        )
        // Usage dashboards
        .route("/usage", get(handlers::usage_stats))
        .route("/usage/dashboard-stats", get(handlers::dashboard_stats))
        .route("/usage/storage", get(handlers::storage_stats))
        .route("/usage/details", get(handlers::usage_details))
        // Dashboard file management
        .route(
            "/frontend/files/upload",
            post(handlers::frontend_upload_file).layer(upload_limit),
        )
        .route("/frontend/files/list", get(handlers::frontend_list_files))
        .route(
            "/frontend/files/:file_id",
            delete(handlers::frontend_delete_file),
        )
        // Public content
        .route("/files/:file_id", get(handlers::serve_file))
        .route("/files/:file_id/thumbnail", get(handlers::serve_thumbnail))
        .route("/health", get(handlers::health))
        .merge(api_v1);

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    let cors = cors_layer(state.config.frontend_url.as_deref());

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    let origin = match frontend_url.map(|u| HeaderValue::from_str(u.trim_end_matches('/'))) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        Some(Err(_)) => {
            tracing::warn!("FRONTEND_URL is not a valid origin, allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::testutil::{multipart_body, test_state, BOUNDARY, OTHER_TOKEN, OWNER_TOKEN, VIEWER_TOKEN};

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn authed_get(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn json_post(uri: &str, token: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload(uri: &str, auth: (&str, String), fields: &[(&str, &str)], file: &[u8]) -> Request<Body> {
        Request::post(uri)
            .header(auth.0, auth.1)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, "hello.txt", "text/plain", file)))
            .unwrap()
    }

    async fn create_project(app: &Router, token: &str) -> u64 {
        let (status, body) = send(app, json_post("/projects", token, serde_json::json!({"name": "site"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_u64().unwrap()
    }

    async fn create_key(app: &Router, token: &str, project_id: u64) -> String {
        let (status, body) = send(
            app,
            json_post(
                "/api-keys",
                token,
                serde_json::json!({"name": "ci", "project_id": project_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["key"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn bearer_routes_reject_missing_or_bad_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, body) = send(&app, Request::get("/me").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "fail");

        let (status, _) = send(&app, authed_get("/me", "forged")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn projects_require_whitelisted_role() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, _) = send(&app, authed_get("/projects", VIEWER_TOKEN)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, authed_get("/me", VIEWER_TOKEN)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["uid"], "viewer");
    }

    #[tokio::test]
    async fn project_access_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let project_id = create_project(&app, OWNER_TOKEN).await;

        let (status, body) = send(&app, authed_get(&format!("/projects/{project_id}"), OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "site");
        assert_eq!(body["data"]["api_keys"].as_array().unwrap().len(), 0);

        let (status, _) = send(&app, authed_get(&format!("/projects/{project_id}"), OTHER_TOKEN)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, authed_get("/projects/999", OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_malformed_project_payload() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, body) = send(&app, json_post("/projects", OWNER_TOKEN, serde_json::json!({"title": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "fail");
    }

    #[tokio::test]
    async fn api_key_verify_and_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let project_id = create_project(&app, OWNER_TOKEN).await;
        let key = create_key(&app, OWNER_TOKEN, project_id).await;

        let (status, _) = send(&app, authed_get("/frontend/api-keys/api/verify", OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/frontend/api-keys/api/verify?api_key={key}");
        let (status, body) = send(&app, authed_get(&uri, OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["project_id"], project_id);

        let (status, _) = send(&app, authed_get(&uri, OTHER_TOKEN)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, authed_get(&format!("/api-keys?project_id={project_id}"), OTHER_TOKEN)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn identical_uploads_share_one_object() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let project_id = create_project(&app, OWNER_TOKEN).await;
        let key = create_key(&app, OWNER_TOKEN, project_id).await;

        let (status, first) = send(
            &app,
            upload("/api/v1/files/upload", ("x-api-key", key.clone()), &[], b"hello"),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let pid = project_id.to_string();
        let (status, second) = send(
            &app,
            upload(
                "/frontend/files/upload",
                ("authorization", format!("Bearer {OWNER_TOKEN}")),
                &[("project_id", pid.as_str())],
                b"hello",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        assert_ne!(first["data"]["file"]["id"], second["data"]["id"]);
        assert_eq!(
            first["data"]["file"]["storage_locator"],
            second["data"]["storage_locator"]
        );
        assert_eq!(first["data"]["size"], 5);

        let req = Request::get("/api/v1/files/list")
            .header("x-api-key", key.as_str())
            .body(Body::empty())
            .unwrap();
        let (status, listing) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upload_to_foreign_project_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let project_id = create_project(&app, OWNER_TOKEN).await;

        let pid = project_id.to_string();
        let (status, body) = send(
            &app,
            upload(
                "/frontend/files/upload",
                ("authorization", format!("Bearer {OTHER_TOKEN}")),
                &[("project_id", pid.as_str())],
                b"hello",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["data"]["message"], "Not authorized to upload to this project");
    }

    #[tokio::test]
    async fn public_download_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let project_id = create_project(&app, OWNER_TOKEN).await;

        let pid = project_id.to_string();
        let (_, uploaded) = send(
            &app,
            upload(
                "/frontend/files/upload",
                ("authorization", format!("Bearer {OWNER_TOKEN}")),
                &[("project_id", pid.as_str())],
                b"hello",
            ),
        )
        .await;
        let file_id = uploaded["data"]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(Request::get(format!("/files/{file_id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "inline; filename=\"hello.txt\""
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "public, max-age=3600");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");

        let (status, _) = send(&app, authed_get(&format!("/files/{file_id}/thumbnail"), OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let delete_req = |token: &str| {
            Request::delete(format!("/frontend/files/{file_id}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap()
        };
        let (status, _) = send(&app, delete_req(OTHER_TOKEN)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, delete_req(OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, delete_req(OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, authed_get(&format!("/files/{file_id}"), OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_calls_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));
        let project_id = create_project(&app, OWNER_TOKEN).await;
        let key = create_key(&app, OWNER_TOKEN, project_id).await;

        let list = || {
            Request::get("/api/v1/files/list")
                .header("x-api-key", key.as_str())
                .body(Body::empty())
                .unwrap()
        };
        send(&app, list()).await;
        send(&app, list()).await;
        let (status, _) = send(
            &app,
            Request::get("/api/v1/files/transform-url?key=elsewhere/a.png")
                .header("x-api-key", key.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, authed_get("/usage/details", OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::OK);
        let records = body["data"].as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["endpoint"], "/api/v1/files/transform-url");
        assert_eq!(records[0]["status_code"], 403);
        assert_eq!(records[2]["endpoint"], "/api/v1/files/list");

        let (status, body) = send(&app, authed_get("/usage/dashboard-stats", OWNER_TOKEN)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_api_requests"], 3);
        assert_eq!(body["data"]["api_requests_change"], 100.0);
    }

    #[tokio::test]
    async fn invalid_api_key_is_rejected_and_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(&dir));

        let (status, _) = send(
            &app,
            Request::get("/api/v1/files/list")
                .header("x-api-key", "openupload_sk_nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, Request::get("/api/v1/files/list").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn deleting_project_releases_files() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let app = create_router(Arc::clone(&state));
        let project_id = create_project(&app, OWNER_TOKEN).await;
        let key = create_key(&app, OWNER_TOKEN, project_id).await;

        send(&app, upload("/api/v1/files/upload", ("x-api-key", key.clone()), &[], b"abc")).await;
        assert_eq!(state.db.list_project_files(project_id).unwrap().len(), 1);

        let (status, body) = send(
            &app,
            Request::delete(format!("/projects/{project_id}"))
                .header(header::AUTHORIZATION, format!("Bearer {OWNER_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["files_deleted"], 1);

        assert!(state.db.list_project_files(project_id).unwrap().is_empty());
        assert!(state.db.find_active_api_key(&key).unwrap().is_none());
        let prefix = state.project_key_prefix(project_id);
        assert!(state.object_store.list(&prefix).await.unwrap().is_empty());
    }
}
