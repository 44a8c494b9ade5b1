use super::ObjectStoreError;

const SCHEME: &str = "s3://";

/// A parsed `storage_locator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator<'a> {
    /// `s3://<bucket>/<key>`
    Object { bucket: &'a str, key: &'a str },
    /// Anything without the `s3://` scheme: a file written by the old
    /// local-disk uploader, addressed by its filesystem path.
    LocalPath(&'a str),
}

impl<'a> Locator<'a> {
    pub fn parse(locator: &'a str) -> Result<Self, ObjectStoreError> {
        let Some(rest) = locator.strip_prefix(SCHEME) else {
            if locator.trim().is_empty() {
                return Err(ObjectStoreError::InvalidLocator(locator.to_string()));
            }
            return Ok(Locator::LocalPath(locator));
        };

        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| ObjectStoreError::InvalidLocator(locator.to_string()))?;
        let key = key.trim_start_matches('/');
        if bucket.is_empty() || key.is_empty() {
            return Err(ObjectStoreError::InvalidLocator(locator.to_string()));
        }

        Ok(Locator::Object { bucket, key })
    }
}

pub fn object_locator(bucket: &str, key: &str) -> String {
    format!("{SCHEME}{bucket}/{}", key.trim_start_matches('/'))
}
