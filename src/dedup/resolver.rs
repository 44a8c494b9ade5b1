use super::store::MetadataStore;
use crate::storage::DatabaseError;

/// Outcome of looking up an upload's digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The bytes are already stored; point the new record at `locator`.
    Reuse { locator: String, size: u64 },
    StoreNew,
}

/// Decide whether an upload with `digest` must be written to the object store.
///
/// Equal digests are treated as equal content. When the existing record's
/// size disagrees with `size` the existing size wins.
pub fn resolve<M>(store: &M, digest: &str, size: u64) -> Result<Resolution, DatabaseError>
where
    M: MetadataStore + ?Sized,
{
    let Some(existing) = store.find_by_digest(digest)? else {
        return Ok(Resolution::StoreNew);
    };

    if existing.size != size {
        tracing::warn!(
            digest = %digest,
            existing_file = %existing.id,
            existing_size = existing.size,
            upload_size = size,
            "Digest match with differing size, keeping existing size"
        );
    }

    Ok(Resolution::Reuse {
        locator: existing.storage_locator,
        size: existing.size,
    })
}
