//! relstrap - release bootstrapper for single-instance deployments
//!
//! Takes a software release (a directory or `.tgz` holding packages and
//! jobs) plus a deployment manifest and produces an installed deployment:
//! packages are compiled in dependency order, job templates are rendered
//! against the manifest's properties and both are unpacked into the
//! deployment workspace.
//!
//! # Architecture Overview
//!
//! An install is a linear pipeline whose stages are reported in order:
//!
//! ```text
//! Extracted → Validated → DependenciesOrdered → PackagesCompiled → TemplatesRendered → Installed
//! ```
//!
//! Compiled packages and rendered templates are content-addressed: each
//! artifact is keyed by a [`fingerprint::Fingerprint`] derived from its
//! inputs and stored in an append-only [`cache::ArtifactRepo`]. A second
//! run over an unchanged release compiles and renders nothing; a run that
//! failed halfway resumes from the first uncached step.
//!
//! # Core Modules
//!
//! ## Release model
//! - [`release`] - reading, extracting and validating releases
//! - [`manifest`] - deployment manifest parsing
//! - [`resolver`] - dependency analysis and layered package ordering
//!
//! ## Artifacts
//! - [`fingerprint`] - deterministic artifact fingerprints
//! - [`archive`] - reproducible tarballs
//! - [`blobstore`] - checksummed blob storage
//! - [`index`] - JSON-backed key/value index
//! - [`cache`] - fingerprint-keyed artifact caches and the workspace lock
//!
//! ## Pipeline
//! - [`compiler`] - package compilation, single and release-wide
//! - [`templating`] - job template rendering and caching
//! - [`installer`] - the install orchestrator and job installation
//! - [`events`] - stage and step reporting
//!
//! ## Surface
//! - [`config`] - user configuration and deployment workspace layout
//! - [`cli`] - the `relstrap` command line
//! - [`core`] - error taxonomy, stages and cancellation
//! - [`utils`] - filesystem and progress helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use relstrap::config::DeploymentWorkspace;
//! use relstrap::installer::ReleaseInstaller;
//! use relstrap::manifest::DeploymentManifest;
//! # use std::sync::Arc;
//! # use relstrap::compiler::CompilationEnvironment;
//! # async fn example(environment: Arc<dyn CompilationEnvironment>) -> anyhow::Result<()> {
//! let workspace = DeploymentWorkspace::open("/srv/relstrap")?;
//! let manifest = DeploymentManifest::load("deployment.yml".as_ref()).await?;
//!
//! let installer = ReleaseInstaller::for_workspace(&workspace, environment, "local")?
//!     .max_parallel(4)
//!     .build();
//! let report = installer.install("director-1.tgz".as_ref(), &manifest).await?;
//! println!("{} packages compiled", report.packages_compiled);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod blobstore;
pub mod cache;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod core;
pub mod events;
pub mod fingerprint;
pub mod index;
pub mod installer;
pub mod manifest;
pub mod release;
pub mod resolver;
pub mod templating;
pub mod utils;

// test_utils is available for unit tests and, behind the feature, for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
