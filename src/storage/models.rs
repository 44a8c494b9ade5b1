use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logical uploaded file. Several records may share one stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of the content. Absent on legacy records.
    #[serde(default)]
    pub content_digest: Option<String>,
    /// `s3://<bucket>/<key>`, or a local filesystem path for legacy records.
    pub storage_locator: String,
    pub project_id: u64,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Result of inserting a file record.
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    /// The record was stored as given.
    Inserted(FileRecord),
    /// A record with the same digest already existed. The new record was stored
    /// sharing that record's locator and size; `discarded_locator` is the
    /// locator the caller proposed, which nothing references.
    Adopted {
        record: FileRecord,
        discarded_locator: String,
    },
    /// The caller asked to reuse an existing object but every record holding
    /// that digest has since been deleted. Nothing was written.
    Stale,
}

/// Where the bytes behind an inserted record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The caller just wrote a fresh object at the record's locator.
    Stored,
    /// The caller copied the locator from an existing record with the same digest.
    Reused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: u64,
    pub key: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub owner_id: String,
    pub project_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUsage {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub response_time_ms: f64,
    pub status_code: u16,
    pub owner_id: String,
    pub project_id: u64,
    pub api_key_id: u64,
}

/// Aggregated storage figures for a user or project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageTotals {
    pub total_storage: u64,
    pub total_files: u64,
}
