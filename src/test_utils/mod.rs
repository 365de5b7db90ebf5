//! Test utilities for relstrap
//!
//! Helpers shared by unit and integration tests:
//!
//! - [`ReleaseFixture`] writes an extracted release directory
//! - [`FakeCompilationEnvironment`] stands in for real builds and counts calls
//! - [`RecordingReporter`] captures installer progress events
//! - [`TestWorkspace`] wires a complete installer over a temporary workspace
//!
//! # Example
//!
//! ```rust,no_run
//! use relstrap::test_utils::{PackageFixture, ReleaseFixture, TestWorkspace, manifest_yaml};
//! use relstrap::manifest::DeploymentManifest;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let ws = TestWorkspace::new()?;
//! let release = ReleaseFixture::new("director", "1")
//!     .package(PackageFixture::new("base", &[]))
//!     .write(&ws.release_dir("director"))?;
//! # Ok(())
//! # }
//! ```

pub mod fakes;
pub mod fixtures;

pub use fakes::{FakeCompilationEnvironment, RecordingReporter, ReporterEvent};
pub use fixtures::{JobFixture, PackageFixture, ReleaseFixture, manifest_yaml};

use anyhow::Result;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::cache::ArtifactRepo;
use crate::config::DeploymentWorkspace;
use crate::installer::{ReleaseInstaller, ReleaseInstallerBuilder};

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. Uses `level` if given, otherwise
/// `RUST_LOG`; with neither, tests log nothing.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}

/// A temporary deployment workspace with a fake compilation environment.
pub struct TestWorkspace {
    pub temp: TempDir,
    pub workspace: DeploymentWorkspace,
    pub environment: Arc<FakeCompilationEnvironment>,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Self::with_environment(FakeCompilationEnvironment::new())
    }

    pub fn with_environment(environment: FakeCompilationEnvironment) -> Result<Self> {
        init_test_logging(None);
        let temp = TempDir::new()?;
        let workspace = DeploymentWorkspace::open(temp.path().join("workspace"))?;
        Ok(Self {
            temp,
            workspace,
            environment: Arc::new(environment),
        })
    }

    /// Directory to write a release fixture named `name` to.
    pub fn release_dir(&self, name: &str) -> PathBuf {
        self.temp.path().join("releases").join(name)
    }

    /// Installer builder over this workspace; caches are reopened from disk.
    pub fn builder(&self) -> Result<ReleaseInstallerBuilder> {
        ReleaseInstaller::for_workspace(&self.workspace, self.environment.clone(), "test")
    }

    /// Installer with default settings.
    pub fn installer(&self) -> Result<ReleaseInstaller> {
        Ok(self.builder()?.build())
    }

    /// The package cache as persisted on disk.
    pub fn package_cache(&self) -> Result<ArtifactRepo> {
        ArtifactRepo::open("packages", self.workspace.package_cache_path())
    }

    /// The template cache as persisted on disk.
    pub fn template_cache(&self) -> Result<ArtifactRepo> {
        ArtifactRepo::open("templates", self.workspace.template_cache_path())
    }
}
