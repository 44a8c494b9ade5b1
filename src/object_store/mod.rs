mod local;
mod locator;
mod s3;
mod sigv4;

pub use local::LocalStore;
pub use locator::{object_locator, Locator};
pub use s3::{S3Config, S3Store};
pub use sigv4::Signer;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Invalid storage locator: {0}")]
    InvalidLocator(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Object store did not answer within {0:?}")]
    Timeout(Duration),
}

/// Bytes handed to [`ObjectStore::put`]. Spooled uploads arrive as an open
/// file so they can be streamed to the backend without loading them whole.
pub enum ObjectBody {
    Bytes(Bytes),
    File(tokio::fs::File),
}

impl From<Bytes> for ObjectBody {
    fn from(data: Bytes) -> Self {
        ObjectBody::Bytes(data)
    }
}

impl From<&'static str> for ObjectBody {
    fn from(data: &'static str) -> Self {
        ObjectBody::Bytes(Bytes::from_static(data.as_bytes()))
    }
}

impl From<tokio::fs::File> for ObjectBody {
    fn from(file: tokio::fs::File) -> Self {
        ObjectBody::File(file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Abstraction over object storage backends.
///
/// Keys are bucket-relative (`uploads/7/2024/05/01/<uuid>/photo.png`). Callers
/// holding a full `s3://` locator go through [`Locator::parse`] first.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket the keys live in; part of every locator this store produces.
    fn bucket(&self) -> &str;

    /// `size` is the exact body length; backends that need a content length
    /// up front rely on it.
    async fn put(&self, key: &str, body: ObjectBody, size: u64) -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, ObjectStoreError>;

    /// A time-limited URL for downloading `key` directly from the backend,
    /// or `None` when the backend cannot issue one.
    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<Option<String>, ObjectStoreError>;

    async fn ensure_bucket(&self) -> Result<(), ObjectStoreError> {
        Ok(())
    }
}
