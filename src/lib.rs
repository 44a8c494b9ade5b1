//! open-upload - file upload as a service
//!
//! This crate provides projects, API keys and file storage with:
//! - Content-addressed deduplication: identical uploads share one stored object
//! - Reference-counted deletes that release an object with its last record
//! - Swappable object storage backends (S3-compatible over SigV4, local filesystem)
//! - redb embedded database for metadata (ACID, MVCC, crash-safe)
//! - REST API with Firebase bearer auth, API keys and usage dashboards

pub mod api;
pub mod auth;
pub mod config;
pub mod dedup;
pub mod imgproxy;
pub mod object_store;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use auth::TokenVerifier;
use config::Config;
use dedup::FileLifecycle;
use imgproxy::UrlBuilder;
use object_store::ObjectStore;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub object_store: Arc<dyn ObjectStore>,
    pub files: FileLifecycle<Database>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub imgproxy: UrlBuilder,
    /// Outbound client for the imgproxy sidecar
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        verifier: Arc<dyn TokenVerifier>,
        http: reqwest::Client,
    ) -> Self {
        let files = FileLifecycle::new(db.clone(), Arc::clone(&object_store), config.request_timeout)
            .with_key_prefix(config.storage.key_prefix.clone())
            .with_storage_limit(config.storage_limit);
        let imgproxy = UrlBuilder::new(&config.imgproxy, object_store.bucket());

        Self {
            config,
            db,
            object_store,
            files,
            verifier,
            imgproxy,
            http,
        }
    }

    /// Object key namespace of a project: `<prefix>/<project_id>/`.
    pub fn project_key_prefix(&self, project_id: u64) -> String {
        let prefix = self.config.storage.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{project_id}/")
        } else {
            format!("{prefix}/{project_id}/")
        }
    }
}
