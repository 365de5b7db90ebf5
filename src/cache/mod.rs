//! Compiled artifact caches.
//!
//! An [`ArtifactRepo`] maps a [`Fingerprint`] to the [`BlobRef`] of the
//! artifact built for it. Two instances are used per workspace: one for
//! compiled packages and one for rendered job templates. Both follow the
//! same rules:
//!
//! - entries are append-only and never mutated or removed
//! - saving a fingerprint again with the same blob is a no-op
//! - saving a fingerprint again with a different blob is rejected with
//!   [`ReleaseError::DuplicateFingerprint`]; the existing entry stays
//! - entries are persisted through a [`FileIndex`] and survive restarts
//!
//! Saves for one fingerprint are serialized through a per-key lock, and the
//! index serializes writes of the backing file.

pub mod lock;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::blobstore::BlobRef;
use crate::core::ReleaseError;
use crate::fingerprint::Fingerprint;
use crate::index::FileIndex;

pub use lock::WorkspaceLock;

/// A cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Where the artifact is stored
    pub blob: BlobRef,
    /// When the entry was first recorded
    pub created_at: DateTime<Utc>,
}

/// Fingerprint-keyed, append-only artifact cache.
#[derive(Debug)]
pub struct ArtifactRepo {
    kind: String,
    index: FileIndex<CacheEntry>,
    key_locks: DashMap<Fingerprint, Arc<Mutex<()>>>,
}

impl ArtifactRepo {
    /// Open the cache persisted at `path`. `kind` labels log lines
    /// (`packages`, `templates`).
    pub fn open(kind: impl Into<String>, path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            kind: kind.into(),
            index: FileIndex::open(path)?,
            key_locks: DashMap::new(),
        })
    }

    /// Label of this cache.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Look up the artifact recorded for `fingerprint`.
    pub fn find(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, ReleaseError> {
        Ok(self.index.get(fingerprint.as_str())?)
    }

    /// Record `blob` as the artifact for `fingerprint`.
    ///
    /// Returns the entry now in the cache, which is the existing one when the
    /// same blob was saved before.
    pub fn save(
        &self,
        fingerprint: &Fingerprint,
        blob: BlobRef,
    ) -> Result<CacheEntry, ReleaseError> {
        let key_lock = self.key_locks.entry(fingerprint.clone()).or_default().clone();
        let _guard = key_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Cache key lock poisoned for {fingerprint}"))?;

        if let Some(existing) = self.index.get(fingerprint.as_str())? {
            if existing.blob == blob {
                tracing::debug!(
                    cache = %self.kind,
                    fingerprint = %fingerprint.short(),
                    "Artifact already cached"
                );
                return Ok(existing);
            }
            return Err(ReleaseError::DuplicateFingerprint {
                fingerprint: fingerprint.to_string(),
                existing: existing.blob.id,
                attempted: blob.id,
            });
        }

        let entry = CacheEntry {
            blob,
            created_at: Utc::now(),
        };
        self.index.insert(fingerprint.as_str(), entry.clone())?;
        tracing::debug!(
            cache = %self.kind,
            fingerprint = %fingerprint.short(),
            blob = %entry.blob.id,
            "Cached artifact"
        );
        Ok(entry)
    }

    /// All entries, sorted by fingerprint.
    pub fn list(&self) -> Result<Vec<(Fingerprint, CacheEntry)>, ReleaseError> {
        Ok(self
            .index
            .entries()?
            .into_iter()
            .map(|(key, entry)| (Fingerprint::from_string(key), entry))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn blob(id: &str) -> BlobRef {
        BlobRef {
            id: id.to_string(),
            sha256: format!("sha256:{id}"),
        }
    }

    fn fp(value: &str) -> Fingerprint {
        Fingerprint::from_string(format!("sha256:{value}"))
    }

    #[test]
    fn test_find_after_save() {
        let temp = TempDir::new().unwrap();
        let repo = ArtifactRepo::open("packages", temp.path().join("compiled.json")).unwrap();

        assert!(repo.find(&fp("aa")).unwrap().is_none());
        repo.save(&fp("aa"), blob("1")).unwrap();
        assert_eq!(repo.find(&fp("aa")).unwrap().unwrap().blob, blob("1"));
    }

    #[test]
    fn test_same_blob_is_noop() {
        let temp = TempDir::new().unwrap();
        let repo = ArtifactRepo::open("packages", temp.path().join("compiled.json")).unwrap();

        let first = repo.save(&fp("aa"), blob("1")).unwrap();
        let second = repo.save(&fp("aa"), blob("1")).unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn test_different_blob_is_rejected() {
        let temp = TempDir::new().unwrap();
        let repo = ArtifactRepo::open("packages", temp.path().join("compiled.json")).unwrap();

        repo.save(&fp("aa"), blob("1")).unwrap();
        let err = repo.save(&fp("aa"), blob("2")).unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::DuplicateFingerprint { ref existing, ref attempted, .. }
                if existing == "1" && attempted == "2"
        ));
        assert_eq!(repo.find(&fp("aa")).unwrap().unwrap().blob, blob("1"));
    }

    #[test]
    fn test_entries_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("templates.json");

        let repo = ArtifactRepo::open("templates", &path).unwrap();
        repo.save(&fp("bb"), blob("2")).unwrap();
        repo.save(&fp("aa"), blob("1")).unwrap();
        drop(repo);

        let reopened = ArtifactRepo::open("templates", &path).unwrap();
        let listed: Vec<String> =
            reopened.list().unwrap().into_iter().map(|(f, _)| f.to_string()).collect();
        assert_eq!(listed, vec!["sha256:aa", "sha256:bb"]);
        assert!(reopened.save(&fp("aa"), blob("other")).is_err());
    }

    #[test]
    fn test_concurrent_saves_keep_one_entry() {
        let temp = TempDir::new().unwrap();
        let repo = Arc::new(ArtifactRepo::open("packages", temp.path().join("c.json")).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || repo.save(&fp("aa"), blob(&format!("{}", i % 2))))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stored = repo.find(&fp("aa")).unwrap().unwrap().blob;
        for result in results {
            match result {
                Ok(entry) => assert_eq!(entry.blob, stored),
                Err(err) => assert!(matches!(err, ReleaseError::DuplicateFingerprint { .. })),
            }
        }
        assert_eq!(repo.list().unwrap().len(), 1);
    }
}
