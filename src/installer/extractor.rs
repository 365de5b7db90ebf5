//! Placing stored artifacts onto the target filesystem.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::archive;
use crate::blobstore::{BlobRef, Blobstore};
use crate::core::{BoxFuture, ReleaseError};
use crate::utils::fs::{remove_dir_if_exists, replace_dir};

/// Installs an artifact at a target directory.
pub trait ArtifactInstaller: Send + Sync {
    /// Replace the content of `target` with the artifact `blob`.
    fn install<'a>(&'a self, blob: &'a BlobRef, target: &'a Path) -> BoxFuture<'a, ()>;
}

/// Downloads a blob, verifies it and unpacks it over the target.
///
/// The archive is unpacked into a staging directory next to `target` and
/// renamed into place, so `target` never holds a partial artifact.
pub struct BlobExtractor {
    blobstore: Arc<dyn Blobstore>,
}

impl BlobExtractor {
    /// Create an extractor reading from `blobstore`.
    pub fn new(blobstore: Arc<dyn Blobstore>) -> Self {
        Self {
            blobstore,
        }
    }

    async fn extract(&self, blob: &BlobRef, target: &Path) -> Result<()> {
        let bytes = self.blobstore.get(blob).await.map_err(|e| {
            ReleaseError::from_collaborator(e, |reason| ReleaseError::DownloadFailed {
                blob_id: blob.id.clone(),
                reason,
            })
        })?;

        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid install target: {}", target.display()))?;
        let staging = target.with_file_name(format!(".{name}.staging"));
        let destination = target.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<()> {
            remove_dir_if_exists(&staging)?;
            if let Err(e) = archive::unpack(&bytes, &staging) {
                let _ = remove_dir_if_exists(&staging);
                return Err(e);
            }
            replace_dir(&staging, &destination)
        })
        .await
        .context("Extraction task failed")??;

        tracing::debug!(blob = %blob.id, target = %target.display(), "Extracted artifact");
        Ok(())
    }
}

impl ArtifactInstaller for BlobExtractor {
    fn install<'a>(&'a self, blob: &'a BlobRef, target: &'a Path) -> BoxFuture<'a, ()> {
        Box::pin(self.extract(blob, target))
    }
}
