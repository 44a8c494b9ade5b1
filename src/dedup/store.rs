use crate::storage::models::{FileRecord, Insertion, Origin};
use crate::storage::{Database, DatabaseError};

/// The slice of the metadata store the dedup core depends on.
pub trait MetadataStore: Send + Sync {
    /// Any one record holding `digest`.
    fn find_by_digest(&self, digest: &str) -> Result<Option<FileRecord>, DatabaseError>;
    fn count_by_digest(&self, digest: &str) -> Result<u64, DatabaseError>;
    fn count_by_locator(&self, locator: &str) -> Result<u64, DatabaseError>;
    /// Insert a new record. When another record already holds the digest the
    /// store makes the new one share its locator and size.
    fn insert(&self, record: &FileRecord, origin: Origin) -> Result<Insertion, DatabaseError>;
    fn delete_by_id(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError>;
    fn find_by_id(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError>;
}

impl MetadataStore for Database {
    fn find_by_digest(&self, digest: &str) -> Result<Option<FileRecord>, DatabaseError> {
        self.find_file_by_digest(digest)
    }

    fn count_by_digest(&self, digest: &str) -> Result<u64, DatabaseError> {
        self.count_files_by_digest(digest)
    }

    fn count_by_locator(&self, locator: &str) -> Result<u64, DatabaseError> {
        self.count_files_by_locator(locator)
    }

    fn insert(&self, record: &FileRecord, origin: Origin) -> Result<Insertion, DatabaseError> {
        self.insert_file(record, origin)
    }

    fn delete_by_id(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        self.delete_file(id)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        self.get_file(id)
    }
}
