use super::store::MetadataStore;
use crate::storage::models::FileRecord;
use crate::storage::DatabaseError;

/// What happens to the stored object after a record is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other records still point at the object.
    Retained { remaining: u64 },
    /// No record points at the object any more; it may be deleted.
    Orphaned,
}

/// Count what still references `removed`'s object. Call after its row is gone.
///
/// Records sharing the digest are counted first. If none remain, rows sharing
/// the exact locator are counted too, which catches legacy rows that carry no
/// digest but were pointed at the same object.
pub fn release<M>(store: &M, removed: &FileRecord) -> Result<Release, DatabaseError>
where
    M: MetadataStore + ?Sized,
{
    let mut remaining = match removed.content_digest.as_deref() {
        Some(digest) if !digest.is_empty() => store.count_by_digest(digest)?,
        _ => 0,
    };
    if remaining == 0 {
        remaining = store.count_by_locator(&removed.storage_locator)?;
    }

    Ok(if remaining == 0 {
        Release::Orphaned
    } else {
        Release::Retained { remaining }
    })
}
