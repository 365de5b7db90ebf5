//! Deployment workspace layout.
//!
//! ```text
//! <root>/deployment.json          deployment id, created on first use
//! <root>/.lock                    held for the duration of one run
//! <root>/blobs/                   local blobstore
//! <root>/compiled_packages.json   package cache
//! <root>/templates.json           template cache
//! <root>/packages/                installed packages
//! <root>/jobs/                    installed jobs
//! <root>/tmp/                     release extraction and compilation scratch
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::cache::lock::LOCK_FILE;
use crate::utils::fs::{atomic_write, ensure_dir};

const DEPLOYMENT_FILE: &str = "deployment.json";

#[derive(Debug, Serialize, Deserialize)]
struct DeploymentRecord {
    deployment_id: Uuid,
    created_at: DateTime<Utc>,
}

/// Paths of one deployment workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentWorkspace {
    root: PathBuf,
    deployment_id: Uuid,
}

impl DeploymentWorkspace {
    /// Open the workspace at `root`, creating it and its deployment id on
    /// first use.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root)?;

        let record_path = root.join(DEPLOYMENT_FILE);
        let deployment_id = if record_path.exists() {
            let content = std::fs::read_to_string(&record_path)
                .with_context(|| format!("Failed to read {}", record_path.display()))?;
            let record: DeploymentRecord =
                serde_json::from_str(&content).with_context(|| {
                    format!("Invalid deployment record in {}", record_path.display())
                })?;
            record.deployment_id
        } else {
            let record = DeploymentRecord {
                deployment_id: Uuid::new_v4(),
                created_at: Utc::now(),
            };
            atomic_write(&record_path, serde_json::to_string_pretty(&record)?.as_bytes())?;
            tracing::info!(
                workspace = %root.display(),
                deployment = %record.deployment_id,
                "Created deployment workspace"
            );
            record.deployment_id
        };

        Ok(Self {
            root,
            deployment_id,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identity of this deployment, stable across runs.
    pub fn deployment_id(&self) -> Uuid {
        self.deployment_id
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn package_cache_path(&self) -> PathBuf {
        self.root.join("compiled_packages.json")
    }

    pub fn template_cache_path(&self) -> PathBuf {
        self.root.join("templates.json")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }
}
