use std::path::Path;

use ring::digest;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("File exceeds maximum upload size of {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("Failed to spool upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Incremental SHA-256 over an upload, copying every chunk to a spool file.
pub struct ContentHasher {
    context: digest::Context,
    writer: tokio::fs::File,
    spool: NamedTempFile,
    size: u64,
    max_size: u64,
}

/// A fully received upload: its digest, length and an on-disk copy.
///
/// The spool file is deleted when this value is dropped.
#[derive(Debug)]
pub struct HashedUpload {
    pub digest: String,
    pub size: u64,
    spool: NamedTempFile,
}

impl ContentHasher {
    pub fn new(spool_dir: &Path, max_size: u64) -> Result<Self, HashError> {
        std::fs::create_dir_all(spool_dir)?;
        let spool = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(spool_dir)?;
        let writer = tokio::fs::File::from_std(spool.as_file().try_clone()?);

        Ok(Self {
            context: digest::Context::new(&digest::SHA256),
            writer,
            spool,
            size: 0,
            max_size,
        })
    }

    pub async fn update(&mut self, chunk: &[u8]) -> Result<(), HashError> {
        let size = self.size + chunk.len() as u64;
        if size > self.max_size {
            return Err(HashError::TooLarge {
                limit: self.max_size,
            });
        }

        self.writer.write_all(chunk).await?;
        self.context.update(chunk);
        self.size = size;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<HashedUpload, HashError> {
        self.writer.flush().await?;
        self.writer.sync_data().await?;

        Ok(HashedUpload {
            digest: hex::encode(self.context.finish()),
            size: self.size,
            spool: self.spool,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl HashedUpload {
    /// Spool an in-memory buffer. Used where the body is already complete.
    pub async fn from_bytes(spool_dir: &Path, max_size: u64, data: &[u8]) -> Result<Self, HashError> {
        let mut hasher = ContentHasher::new(spool_dir, max_size)?;
        hasher.update(data).await?;
        hasher.finish().await
    }

    /// A fresh read handle positioned at the start of the spooled bytes.
    pub async fn reopen(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.spool.path()).await
    }

    pub fn spool_path(&self) -> &Path {
        self.spool.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn digest_of_hello() {
        let dir = tempfile::tempdir().unwrap();
        let upload = HashedUpload::from_bytes(dir.path(), 1024, b"hello").await.unwrap();

        assert_eq!(
            upload.digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(upload.size, 5);
    }

    #[tokio::test]
    async fn digest_of_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let hasher = ContentHasher::new(dir.path(), 1024).unwrap();
        let upload = hasher.finish().await.unwrap();

        assert_eq!(
            upload.digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(upload.size, 0);
    }

    #[tokio::test]
    async fn chunking_does_not_change_digest() {
        let dir = tempfile::tempdir().unwrap();
        let mut hasher = ContentHasher::new(dir.path(), 1024).unwrap();
        hasher.update(b"he").await.unwrap();
        hasher.update(b"").await.unwrap();
        hasher.update(b"llo").await.unwrap();
        let chunked = hasher.finish().await.unwrap();

        let whole = HashedUpload::from_bytes(dir.path(), 1024, b"hello").await.unwrap();
        assert_eq!(chunked.digest, whole.digest);
    }

    #[tokio::test]
    async fn rejects_oversized_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut hasher = ContentHasher::new(dir.path(), 8).unwrap();
        hasher.update(b"12345").await.unwrap();

        let err = hasher.update(b"6789").await.unwrap_err();
        assert!(matches!(err, HashError::TooLarge { limit: 8 }));
        assert_eq!(hasher.size(), 5);
    }

    #[tokio::test]
    async fn spool_can_be_read_repeatedly() {
        let dir = tempfile::tempdir().unwrap();
        let upload = HashedUpload::from_bytes(dir.path(), 1024, b"hello world").await.unwrap();

        for _ in 0..2 {
            let mut contents = String::new();
            upload.reopen().await.unwrap().read_to_string(&mut contents).await.unwrap();
            assert_eq!(contents, "hello world");
        }
    }

    #[tokio::test]
    async fn spool_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let upload = HashedUpload::from_bytes(dir.path(), 1024, b"bytes").await.unwrap();
        let path = upload.spool_path().to_path_buf();
        assert!(path.exists());

        drop(upload);
        assert!(!path.exists());
    }
}
