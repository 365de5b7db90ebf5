//! Durable key/value index persisted as a JSON file.
//!
//! [`FileIndex`] is the local storage behind the artifact caches. Entries are
//! kept in memory and the whole map is rewritten atomically (temp file plus
//! rename) on every insert, so a crash leaves either the old or the new file
//! on disk, never a truncated one.
//!
//! File format:
//!
//! ```json
//! { "version": 1, "entries": { "<key>": <value>, ... } }
//! ```

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::utils::fs::atomic_write;

/// Current on-disk format version.
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct IndexFile<V> {
    version: u32,
    entries: BTreeMap<String, V>,
}

/// A string-keyed map persisted to a JSON file.
#[derive(Debug)]
pub struct FileIndex<V> {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, V>>,
}

impl<V> FileIndex<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Open the index at `path`, loading existing entries.
    ///
    /// A missing file is an empty index; it is created on the first insert.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read index: {}", path.display()))?;
            let file: IndexFile<V> = serde_json::from_str(&content)
                .with_context(|| format!("Index file is corrupt: {}", path.display()))?;
            if file.version != INDEX_FORMAT_VERSION {
                bail!(
                    "Index {} has format version {}, expected {}",
                    path.display(),
                    file.version,
                    INDEX_FORMAT_VERSION
                );
            }
            file.entries
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "Opened index");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, V>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Index lock poisoned: {}", self.path.display()))
    }

    /// Look up `key`.
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        Ok(self.lock()?.get(key).cloned())
    }

    /// Insert or replace `key`, persisting before the in-memory map changes.
    ///
    /// If the write fails the index is unchanged.
    pub fn insert(&self, key: &str, value: V) -> Result<()> {
        let mut entries = self.lock()?;
        let mut next = entries.clone();
        next.insert(key.to_string(), value);

        let file = IndexFile {
            version: INDEX_FORMAT_VERSION,
            entries: next,
        };
        let json = serde_json::to_vec_pretty(&file).context("Failed to serialize index")?;
        atomic_write(&self.path, &json)
            .with_context(|| format!("Failed to persist index: {}", self.path.display()))?;

        *entries = file.entries;
        Ok(())
    }

    /// All entries, sorted by key.
    pub fn entries(&self) -> Result<Vec<(String, V)>> {
        Ok(self.lock()?.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
