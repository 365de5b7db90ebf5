//! Blob storage for compiled packages and rendered jobs.
//!
//! The caches never hold artifact bytes, only [`BlobRef`]s returned by a
//! [`Blobstore`]. Reads are integrity checked: the SHA-256 recorded at upload
//! time must match the bytes read back.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::{BoxFuture, ReleaseError};
use crate::fingerprint::bytes_checksum;

/// Reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    /// Blobstore-assigned identifier
    pub id: String,
    /// `sha256:<hex>` of the blob content
    pub sha256: String,
}

/// Opaque, integrity-checked blob storage.
pub trait Blobstore: Send + Sync {
    /// Store `bytes` and return a reference to them.
    fn put(&self, bytes: Vec<u8>) -> BoxFuture<'_, BlobRef>;

    /// Fetch the bytes of `blob`, verifying its checksum.
    ///
    /// A checksum mismatch is reported as [`ReleaseError::ChecksumMismatch`].
    fn get(&self, blob: &BlobRef) -> BoxFuture<'_, Vec<u8>>;
}

/// Blobstore backed by a local directory, one file per blob.
#[derive(Debug, Clone)]
pub struct LocalBlobstore {
    dir: PathBuf,
}

impl LocalBlobstore {
    /// Create a blobstore rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
        }
    }

    /// Directory holding the blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            bail!("Invalid blob id '{id}'");
        }
        Ok(self.dir.join(id))
    }
}

impl Blobstore for LocalBlobstore {
    fn put(&self, bytes: Vec<u8>) -> BoxFuture<'_, BlobRef> {
        Box::pin(async move {
            let blob = BlobRef {
                id: Uuid::new_v4().to_string(),
                sha256: bytes_checksum(&bytes),
            };
            let path = self.blob_path(&blob.id)?;

            tokio::fs::create_dir_all(&self.dir).await.with_context(|| {
                format!("Failed to create blobstore directory: {}", self.dir.display())
            })?;
            let temp_path = path.with_extension("tmp");
            tokio::fs::write(&temp_path, &bytes)
                .await
                .with_context(|| format!("Failed to write blob: {}", temp_path.display()))?;
            tokio::fs::rename(&temp_path, &path)
                .await
                .with_context(|| format!("Failed to store blob: {}", path.display()))?;

            tracing::debug!(blob = %blob.id, size = bytes.len(), "Stored blob");
            Ok(blob)
        })
    }

    fn get(&self, blob: &BlobRef) -> BoxFuture<'_, Vec<u8>> {
        let blob = blob.clone();
        Box::pin(async move {
            let path = self.blob_path(&blob.id)?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read blob: {}", path.display()))?;

            let actual = bytes_checksum(&bytes);
            if actual != blob.sha256 {
                return Err(ReleaseError::ChecksumMismatch {
                    blob_id: blob.id,
                    expected: blob.sha256,
                    actual,
                }
                .into());
            }
            Ok(bytes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_then_get() -> Result<()> {
        let temp = TempDir::new()?;
        let store = LocalBlobstore::new(temp.path().join("blobs"));

        let blob = store.put(b"compiled".to_vec()).await?;
        assert_eq!(blob.sha256, bytes_checksum(b"compiled"));
        assert_eq!(store.get(&blob).await?, b"compiled");
        Ok(())
    }

    #[tokio::test]
    async fn test_identical_bytes_get_distinct_ids() -> Result<()> {
        let temp = TempDir::new()?;
        let store = LocalBlobstore::new(temp.path());

        let first = store.put(b"same".to_vec()).await?;
        let second = store.put(b"same".to_vec()).await?;
        assert_ne!(first.id, second.id);
        assert_eq!(first.sha256, second.sha256);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupted_blob_is_detected() -> Result<()> {
        let temp = TempDir::new()?;
        let store = LocalBlobstore::new(temp.path());

        let blob = store.put(b"original".to_vec()).await?;
        std::fs::write(temp.path().join(&blob.id), b"tampered")?;

        let err = store.get(&blob).await.unwrap_err();
        let typed = err.downcast::<ReleaseError>()?;
        assert!(matches!(
            typed,
            ReleaseError::ChecksumMismatch { blob_id, .. } if blob_id == blob.id
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_blob_and_bad_ids() -> Result<()> {
        let temp = TempDir::new()?;
        let store = LocalBlobstore::new(temp.path());

        let missing = BlobRef {
            id: "does-not-exist".to_string(),
            sha256: "sha256:00".to_string(),
        };
        assert!(store.get(&missing).await.is_err());

        let escaping = BlobRef {
            id: "../etc/passwd".to_string(),
            sha256: "sha256:00".to_string(),
        };
        let err = store.get(&escaping).await.unwrap_err();
        assert!(err.to_string().contains("Invalid blob id"));
        Ok(())
    }
}
