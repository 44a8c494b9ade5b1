//! Shared test helpers for router tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::{AuthError, Identity, TokenVerifier, WHITELISTED};
use crate::config::{Config, ImgproxyConfig, ServerConfig, StorageBackend, StorageConfig};
use crate::object_store::LocalStore;
use crate::storage::Database;
use crate::AppState;

/// Whitelisted user that owns whatever the tests create.
pub const OWNER_TOKEN: &str = "owner-token";
/// A second whitelisted user.
pub const OTHER_TOKEN: &str = "other-token";
/// Signed in, but without the whitelisted role.
pub const VIEWER_TOKEN: &str = "viewer-token";

pub const BOUNDARY: &str = "open-upload-test-boundary";

/// Accepts a fixed set of tokens.
pub struct StaticVerifier {
    identities: HashMap<String, Identity>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        let identity = |uid: &str, roles: &[&str]| Identity {
            uid: uid.to_string(),
            email: format!("{uid}@example.com"),
            name: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };

        let identities = HashMap::from([
            (OWNER_TOKEN.to_string(), identity("owner", &[WHITELISTED])),
            (OTHER_TOKEN.to_string(), identity("other", &[WHITELISTED])),
            (VIEWER_TOKEN.to_string(), identity("viewer", &[])),
        ]);
        Self { identities }
    }
}

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.identities
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown test token".into()))
    }
}

pub fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    Config {
        server: ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: temp_dir.path().join("data").to_string_lossy().to_string(),
            spool_dir: temp_dir.path().join("spool"),
        },
        storage: StorageConfig {
            backend: StorageBackend::Local,
            local_storage_path: temp_dir.path().join("files").to_string_lossy().to_string(),
            ..StorageConfig::default()
        },
        imgproxy: ImgproxyConfig::default(),
        firebase_project_id: "open-upload-test".to_string(),
        frontend_url: None,
        test_mode: true,
        max_upload_size: 10 * 1024 * 1024, // 10MB for tests
        storage_limit: 100 * 1024 * 1024,
        request_timeout: Duration::from_secs(5),
    }
}

/// Create a test AppState with a temporary database and local object store.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let config = test_config(temp_dir);

    let db = Database::open(&config.server.data_dir).expect("Failed to open test database");
    let object_store = LocalStore::new(&config.storage.local_storage_path, &config.storage.bucket)
        .expect("Failed to create test object store");

    Arc::new(AppState::new(
        config,
        db,
        Arc::new(object_store),
        Arc::new(StaticVerifier::new()),
        reqwest::Client::new(),
    ))
}

/// A `multipart/form-data` body with text `fields` and one `file` part.
pub fn multipart_body(
    fields: &[(&str, &str)],
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}
