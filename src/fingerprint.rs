//! Content fingerprints for packages and rendered jobs.
//!
//! A [`Fingerprint`] is a SHA-256 identity used as the key of the artifact
//! caches. Package fingerprints cover the package name, its source checksum
//! and the fingerprints of its direct dependencies; since each dependency's
//! fingerprint already covers its own dependencies, a change anywhere in the
//! transitive closure changes the result.
//!
//! Inputs are fed to the hasher as tagged, length-prefixed fields, and
//! collections are always hashed in sorted order, so the same logical input
//! produces the same fingerprint regardless of declaration order.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Deterministic content identity, formatted as `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already formatted fingerprint.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The full `sha256:<hex>` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    ///
    /// Values read back from a cache file are not guaranteed to be hex, so
    /// the cut is made on a character boundary.
    pub fn short(&self) -> &str {
        let hex = self.0.strip_prefix("sha256:").unwrap_or(&self.0);
        match hex.char_indices().nth(12) {
            Some((end, _)) => &hex[..end],
            None => hex,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental builder for fingerprints.
///
/// Each field is written as `tag`, length, bytes so that no two different
/// field sequences hash the same concatenation.
pub struct FingerprintHasher {
    hasher: Sha256,
}

impl FingerprintHasher {
    /// Start a fingerprint for one kind of artifact (`package`, `job-templates`).
    pub fn new(kind: &str) -> Self {
        let mut hasher = Self {
            hasher: Sha256::new(),
        };
        hasher.field("kind", kind.as_bytes());
        hasher
    }

    /// Add one tagged field.
    pub fn field(&mut self, tag: &str, value: &[u8]) -> &mut Self {
        self.hasher.update((tag.len() as u64).to_be_bytes());
        self.hasher.update(tag.as_bytes());
        self.hasher.update((value.len() as u64).to_be_bytes());
        self.hasher.update(value);
        self
    }

    /// Finish and format the fingerprint.
    pub fn finish(self) -> Fingerprint {
        Fingerprint(format!("sha256:{}", hex::encode(self.hasher.finalize())))
    }
}

/// Fingerprint a package from its source checksum and its dependencies' fingerprints.
///
/// `dependencies` maps dependency name to fingerprint; the `BTreeMap` makes
/// the hashing order canonical.
pub fn package_fingerprint(
    name: &str,
    source_checksum: &str,
    dependencies: &BTreeMap<String, Fingerprint>,
) -> Fingerprint {
    let mut hasher = FingerprintHasher::new("package");
    hasher.field("name", name.as_bytes()).field("source", source_checksum.as_bytes());
    for (dep_name, dep_fingerprint) in dependencies {
        hasher
            .field("dependency", dep_name.as_bytes())
            .field("dependency-fingerprint", dep_fingerprint.as_str().as_bytes());
    }
    hasher.finish()
}

/// SHA-256 checksum of a byte slice, formatted as `sha256:<hex>`.
pub fn bytes_checksum(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

/// Deterministic checksum of a directory tree.
///
/// Walks regular files, hashes each one, sorts by `/`-separated relative
/// path and hashes the `path:checksum` lines. Modification times and
/// directory entries do not contribute.
pub fn directory_checksum(path: &Path) -> Result<String> {
    let mut file_hashes: Vec<(String, String)> = Vec::new();

    for entry in walkdir::WalkDir::new(path).follow_links(false) {
        let entry = entry
            .with_context(|| format!("Failed to read directory entry in: {}", path.display()))?;

        if entry.file_type().is_file() {
            let file_path = entry.path();
            let relative = file_path
                .strip_prefix(path)
                .unwrap_or(file_path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let content = std::fs::read(file_path).with_context(|| {
                format!("Cannot read file for checksum calculation: {}", file_path.display())
            })?;
            file_hashes.push((relative, bytes_checksum(&content)));
        }
    }

    file_hashes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (relative, checksum) in &file_hashes {
        hasher.update(format!("{relative}:{checksum}\n").as_bytes());
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}
