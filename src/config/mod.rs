//! Installer configuration.
//!
//! Two layers:
//!
//! 1. **User configuration** (`~/.relstrap/config.toml`, [`InstallerConfig`]):
//!    workspace location, compilation parallelism, target platform and the
//!    shell running packaging scripts. A missing file means defaults.
//! 2. **Deployment workspace** ([`DeploymentWorkspace`]): the resolved
//!    directory layout of one workspace, passed to every component that
//!    touches the filesystem.
//!
//! ```toml
//! workspace = "~/.relstrap/workspace"
//! max_parallel = 4
//! target_platform = "ubuntu-jammy"
//! shell = "bash"
//! ```
//!
//! On Windows the file lives in `%LOCALAPPDATA%\relstrap\config.toml`.

pub mod workspace;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub use workspace::DeploymentWorkspace;

fn default_workspace() -> String {
    "~/.relstrap/workspace".to_string()
}

const fn default_max_parallel() -> usize {
    1
}

fn default_target_platform() -> String {
    "local".to_string()
}

fn default_shell() -> String {
    "bash".to_string()
}

/// User configuration of the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerConfig {
    /// Workspace directory; `~` and environment variables are expanded.
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Maximum number of packages compiled at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Platform identity handed to the compilation environment.
    #[serde(default = "default_target_platform")]
    pub target_platform: String,

    /// Shell running `packaging` scripts, by name or path.
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            max_parallel: default_max_parallel(),
            target_platform: default_target_platform(),
            shell: default_shell(),
        }
    }
}

impl InstallerConfig {
    /// Load from `path`, or from [`default_path`](Self::default_path) when
    /// `None`. A missing file yields the defaults.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Platform-specific location of the user configuration.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow!("Unable to determine local data directory"))?
                .join("relstrap")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow!("Unable to determine home directory"))?
                .join(".relstrap")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// The workspace directory with `~` and variables expanded.
    pub fn workspace_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.workspace)
            .with_context(|| format!("Failed to expand workspace path '{}'", self.workspace))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }

    /// Locate the configured shell.
    pub fn shell_path(&self) -> Result<PathBuf> {
        which::which(&self.shell)
            .with_context(|| format!("Shell '{}' not found; set `shell` in the config", self.shell))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = InstallerConfig::load_with_optional(Some(temp.path().join("absent.toml")))
            .await
            .unwrap();
        assert_eq!(config, InstallerConfig::default());
        assert_eq!(config.max_parallel, 1);
        assert_eq!(config.target_platform, "local");
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "max_parallel = 4\nworkspace = \"/srv/relstrap\"\n").unwrap();

        let config = InstallerConfig::load_from(&path).await.unwrap();
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.workspace_path().unwrap(), PathBuf::from("/srv/relstrap"));
        assert_eq!(config.shell, "bash");
    }

    #[tokio::test]
    async fn test_invalid_toml_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "max_parallel = [").unwrap();

        let err = InstallerConfig::load_from(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_workspace_tilde_expansion() {
        let config = InstallerConfig::default();
        let path = config.workspace_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with(".relstrap/workspace"));
    }
}
