use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::hasher::{HashError, HashedUpload};
use super::refcount::{self, Release};
use super::resolver::{self, Resolution};
use super::store::MetadataStore;
use crate::object_store::{object_locator, Locator, ObjectStore, ObjectStoreError};
use crate::storage::models::{FileRecord, Insertion, Origin};
use crate::storage::DatabaseError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("File not found")]
    NotFound,
    #[error("File exceeds maximum upload size of {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("Storage limit of {limit} bytes exceeded")]
    QuotaExceeded { limit: u64 },
    #[error("Object storage error: {0}")]
    Storage(#[from] ObjectStoreError),
    #[error("Metadata error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Metadata store rejected the new record")]
    Rejected,
    #[error("Failed to read spooled upload: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HashError> for LifecycleError {
    fn from(e: HashError) -> Self {
        match e {
            HashError::TooLarge { limit } => LifecycleError::TooLarge { limit },
            HashError::Io(e) => LifecycleError::Io(e),
        }
    }
}

/// Caller-supplied attributes of a new file.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub filename: String,
    pub mime_type: String,
    pub project_id: u64,
    pub owner_id: String,
}

/// Stores and removes files, keeping one stored object per distinct content.
pub struct FileLifecycle<M> {
    metadata: M,
    objects: Arc<dyn ObjectStore>,
    key_prefix: String,
    storage_limit: Option<u64>,
    timeout: Duration,
}

impl<M: MetadataStore> FileLifecycle<M> {
    pub fn new(metadata: M, objects: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self {
            metadata,
            objects,
            key_prefix: "uploads".to_string(),
            storage_limit: None,
            timeout,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    /// Per-owner byte quota enforced by [`store_file`](Self::store_file).
    pub fn with_storage_limit(mut self, limit: u64) -> Self {
        self.storage_limit = Some(limit);
        self
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    /// Record a hashed upload, writing its bytes only if no record holds them yet.
    ///
    /// `used_storage` is what the owner already stores; pass `None` to skip the
    /// quota check.
    pub async fn store_file(
        &self,
        upload: &HashedUpload,
        file: NewFile,
        used_storage: Option<u64>,
    ) -> Result<FileRecord, LifecycleError> {
        if let (Some(limit), Some(used)) = (self.storage_limit, used_storage) {
            if used.saturating_add(upload.size) > limit {
                return Err(LifecycleError::QuotaExceeded { limit });
            }
        }

        let now = Utc::now();
        let mut record = FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            filename: file.filename,
            mime_type: file.mime_type,
            size: upload.size,
            content_digest: Some(upload.digest.clone()),
            storage_locator: String::new(),
            project_id: file.project_id,
            owner_id: file.owner_id,
            created_at: now,
        };

        if let Resolution::Reuse { locator, size } =
            resolver::resolve(&self.metadata, &upload.digest, upload.size)?
        {
            record.storage_locator = locator;
            record.size = size;

            match self.metadata.insert(&record, Origin::Reused)? {
                Insertion::Inserted(stored) | Insertion::Adopted { record: stored, .. } => {
                    tracing::info!(
                        file_id = %stored.id,
                        digest = %upload.digest,
                        locator = %stored.storage_locator,
                        "Deduplicated upload, reusing stored object"
                    );
                    return Ok(stored);
                }
                Insertion::Stale => {
                    tracing::warn!(
                        digest = %upload.digest,
                        "Reused object was released before insert, storing a fresh copy"
                    );
                }
            }
        }

        let key = self.object_key(record.project_id, now, &record.id, &record.filename);
        let body = upload.reopen().await?;
        self.bounded(self.objects.put(&key, body.into(), upload.size))
            .await?;

        record.storage_locator = object_locator(self.objects.bucket(), &key);
        record.size = upload.size;

        match self.metadata.insert(&record, Origin::Stored) {
            Ok(Insertion::Inserted(stored)) => {
                tracing::debug!(file_id = %stored.id, locator = %stored.storage_locator, "Stored new object");
                Ok(stored)
            }
            Ok(Insertion::Adopted {
                record: stored,
                discarded_locator,
            }) => {
                tracing::info!(
                    file_id = %stored.id,
                    digest = %upload.digest,
                    locator = %stored.storage_locator,
                    "Concurrent upload stored the same content first, dropping duplicate object"
                );
                self.delete_object(&discarded_locator).await;
                Ok(stored)
            }
            Ok(Insertion::Stale) => {
                // Only reused inserts can go stale.
                self.delete_object(&record.storage_locator).await;
                Err(LifecycleError::Rejected)
            }
            Err(e) => {
                // Nothing references the fresh key.
                self.delete_object(&record.storage_locator).await;
                Err(e.into())
            }
        }
    }

    /// Remove a file record, then delete its stored object if no other
    /// record refers to it. Physical deletion failures are logged only.
    pub async fn remove_file(&self, id: &str) -> Result<FileRecord, LifecycleError> {
        let removed = self
            .metadata
            .delete_by_id(id)?
            .ok_or(LifecycleError::NotFound)?;

        match refcount::release(&self.metadata, &removed) {
            Ok(Release::Retained { remaining }) => {
                tracing::debug!(
                    file_id = %removed.id,
                    locator = %removed.storage_locator,
                    remaining,
                    "Stored object still referenced, keeping it"
                );
            }
            Ok(Release::Orphaned) => self.delete_object(&removed.storage_locator).await,
            Err(e) => {
                tracing::warn!(
                    file_id = %removed.id,
                    locator = %removed.storage_locator,
                    error = %e,
                    "Could not count remaining references, keeping stored object"
                );
            }
        }

        Ok(removed)
    }

    /// Bytes behind a record.
    pub async fn read_file(&self, record: &FileRecord) -> Result<Bytes, LifecycleError> {
        match Locator::parse(&record.storage_locator)? {
            Locator::Object { bucket, key } => {
                self.warn_foreign_bucket(bucket, &record.storage_locator);
                match self.bounded(self.objects.get(key)).await {
                    Err(ObjectStoreError::NotFound(_)) => Err(LifecycleError::NotFound),
                    other => Ok(other?),
                }
            }
            Locator::LocalPath(path) => match tokio::fs::read(path).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LifecycleError::NotFound),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Direct download URL for a record, when the backend can sign one.
    pub async fn presign(
        &self,
        record: &FileRecord,
        expires_in: Duration,
    ) -> Result<Option<String>, LifecycleError> {
        match Locator::parse(&record.storage_locator)? {
            Locator::Object { key, .. } => {
                Ok(self.bounded(self.objects.presign_get(key, expires_in)).await?)
            }
            Locator::LocalPath(_) => Ok(None),
        }
    }

    /// `<prefix>/<project>/<yyyy>/<mm>/<dd>/<uuid>/<filename>`
    fn object_key(&self, project_id: u64, at: DateTime<Utc>, id: &str, filename: &str) -> String {
        let name = sanitize_filename(filename);
        let date = at.format("%Y/%m/%d");
        if self.key_prefix.is_empty() {
            format!("{project_id}/{date}/{id}/{name}")
        } else {
            format!("{}/{project_id}/{date}/{id}/{name}", self.key_prefix)
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, ObjectStoreError>>,
    ) -> Result<T, ObjectStoreError> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| ObjectStoreError::Timeout(self.timeout))?
    }

    /// Best-effort physical deletion.
    async fn delete_object(&self, locator: &str) {
        let result = match Locator::parse(locator) {
            Ok(Locator::Object { bucket, key }) => {
                if bucket != self.objects.bucket() {
                    tracing::warn!(
                        locator = %locator,
                        bucket = %self.objects.bucket(),
                        "Locator points at another bucket, not deleting"
                    );
                    return;
                }
                self.bounded(self.objects.delete(key)).await
            }
            Ok(Locator::LocalPath(path)) => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => tracing::debug!(locator = %locator, "Deleted stored object"),
            Err(e) => {
                tracing::warn!(locator = %locator, error = %e, "Failed to delete stored object")
            }
        }
    }

    fn warn_foreign_bucket(&self, bucket: &str, locator: &str) {
        if bucket != self.objects.bucket() {
            tracing::warn!(
                locator = %locator,
                bucket = %self.objects.bucket(),
                "Locator bucket differs from configured bucket"
            );
        }
    }
}

/// Keep a client-supplied filename usable as the last key segment.
fn sanitize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "file".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_reduced_to_last_segment() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\a.png"), "a.png");
        assert_eq!(sanitize_filename("  "), "file");
        assert_eq!(sanitize_filename(".."), "file");
        assert_eq!(sanitize_filename("tab\there.txt"), "tab_here.txt");
    }
}
