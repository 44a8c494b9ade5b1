//! Content-addressed deduplication of uploads.
//!
//! An upload is hashed while it is spooled to disk ([`hasher`]), the digest is
//! looked up in the metadata store ([`resolver`]), and the bytes are written
//! to the object store only when no record already holds them. Deletes go
//! through [`refcount`], which releases the stored object once the last
//! record pointing at it is gone. [`lifecycle`] ties the steps together.

pub mod hasher;
pub mod lifecycle;
pub mod refcount;
pub mod resolver;
pub mod store;

pub use hasher::{ContentHasher, HashError, HashedUpload};
pub use lifecycle::{FileLifecycle, LifecycleError, NewFile};
pub use refcount::Release;
pub use resolver::Resolution;
pub use store::MetadataStore;
