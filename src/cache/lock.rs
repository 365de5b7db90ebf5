//! Exclusive workspace lock.
//!
//! One installer run assumes exclusive use of its workspace. [`WorkspaceLock`]
//! enforces this across processes with an OS file lock on `<workspace>/.lock`;
//! a second run blocks until the first releases the lock.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Name of the lock file inside the workspace.
pub const LOCK_FILE: &str = ".lock";

/// Held for the duration of an installer run; released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Acquire the lock for `workspace`, waiting for other holders.
    ///
    /// The blocking wait runs on the blocking thread pool.
    pub async fn acquire(workspace: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(workspace)
            .await
            .with_context(|| format!("Failed to create workspace: {}", workspace.display()))?;

        let path = workspace.join(LOCK_FILE);
        let lock_path = path.clone();
        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)
                .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
            file.lock_exclusive()
                .with_context(|| format!("Failed to lock workspace: {}", lock_path.display()))?;
            Ok(file)
        })
        .await
        .context("Failed to spawn blocking task for workspace lock")??;

        tracing::debug!(path = %path.display(), "Acquired workspace lock");
        Ok(Self {
            file,
            path,
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        #[allow(unstable_name_collisions)]
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}
