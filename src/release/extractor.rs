//! Release extraction.
//!
//! The installer consumes a parsed [`Release`]; turning an archive on disk
//! into one is the job of a [`ReleaseExtractor`]. The bundled
//! [`ArchiveReleaseExtractor`] accepts either an extracted release directory
//! or a `.tgz` of one.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::{Release, ReleaseReader};
use crate::archive;

/// A parsed release together with the scratch directory its sources live in.
///
/// Package source paths point into the scratch directory, which is removed
/// when this value is dropped.
#[derive(Debug)]
pub struct ExtractedRelease {
    /// The parsed release
    pub release: Release,
    _workdir: Option<TempDir>,
}

impl ExtractedRelease {
    /// Wrap a release whose sources are not owned by the extractor.
    pub fn in_place(release: Release) -> Self {
        Self {
            release,
            _workdir: None,
        }
    }

    /// Wrap a release whose sources live in `workdir`.
    pub fn in_workdir(release: Release, workdir: TempDir) -> Self {
        Self {
            release,
            _workdir: Some(workdir),
        }
    }
}

/// Turns a release location into a parsed [`Release`].
pub trait ReleaseExtractor: Send + Sync {
    /// Extract and parse the release at `source`.
    fn extract(&self, source: &Path) -> Result<ExtractedRelease>;
}

/// Extracts release directories and `.tgz` release archives.
#[derive(Debug, Clone)]
pub struct ArchiveReleaseExtractor {
    scratch_dir: PathBuf,
}

impl ArchiveReleaseExtractor {
    /// Create an extractor that unpacks archives below `scratch_dir`.
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }
}

impl ReleaseExtractor for ArchiveReleaseExtractor {
    fn extract(&self, source: &Path) -> Result<ExtractedRelease> {
        if source.is_dir() {
            tracing::debug!(path = %source.display(), "Reading release directory");
            let release = ReleaseReader::new(source).read()?;
            return Ok(ExtractedRelease::in_place(release));
        }

        if !archive::is_tarball(source) {
            bail!(
                "Release {} is neither a directory nor a .tgz archive",
                source.display()
            );
        }

        std::fs::create_dir_all(&self.scratch_dir).with_context(|| {
            format!("Failed to create scratch directory: {}", self.scratch_dir.display())
        })?;
        let workdir = tempfile::Builder::new()
            .prefix("release-")
            .tempdir_in(&self.scratch_dir)
            .context("Failed to create release extraction directory")?;

        let bytes = std::fs::read(source)
            .with_context(|| format!("Failed to read release archive: {}", source.display()))?;
        archive::unpack(&bytes, workdir.path())?;
        tracing::debug!(
            archive = %source.display(),
            into = %workdir.path().display(),
            "Extracted release archive"
        );

        let release = ReleaseReader::new(workdir.path()).read()?;
        Ok(ExtractedRelease::in_workdir(release, workdir))
    }
}
