//! `relstrap install`: run the full installer pipeline.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use super::CliConfig;
use crate::blobstore::LocalBlobstore;
use crate::cache::WorkspaceLock;
use crate::compiler::CommandCompilationEnvironment;
use crate::config::{DeploymentWorkspace, InstallerConfig};
use crate::core::CancelFlag;
use crate::events::{InstallReporter, ProgressReporter, TracingReporter};
use crate::installer::{InstallReport, ReleaseInstaller};
use crate::manifest::DeploymentManifest;

/// Compile, render and install a release.
///
/// Packages and templates already in the workspace caches are reused;
/// re-running after a failure resumes from the first uncached step.
#[derive(Args, Debug)]
pub struct InstallCommand {
    /// Release directory or `.tgz` archive
    release: PathBuf,

    /// Deployment manifest selecting jobs and binding properties
    #[arg(short, long, value_name = "FILE")]
    manifest: PathBuf,

    /// Workspace directory (overrides the config file)
    #[arg(long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Maximum number of packages compiled at once
    #[arg(long, value_name = "N")]
    max_parallel: Option<usize>,
}

impl InstallCommand {
    pub async fn execute(
        self,
        settings: &InstallerConfig,
        cli: &CliConfig,
        cancel: CancelFlag,
    ) -> Result<()> {
        let root = match self.workspace {
            Some(dir) => dir,
            None => settings.workspace_path()?,
        };
        let workspace = DeploymentWorkspace::open(&root)?;
        let _lock = WorkspaceLock::acquire(workspace.root()).await?;

        let manifest = DeploymentManifest::load(&self.manifest).await?;
        let shell = settings.shell_path()?;

        let blobstore = Arc::new(LocalBlobstore::new(workspace.blobs_dir()));
        let environment =
            Arc::new(CommandCompilationEnvironment::new(shell, workspace.tmp_dir(), blobstore));
        let reporter: Arc<dyn InstallReporter> = if cli.show_progress() {
            Arc::new(ProgressReporter::new(true))
        } else {
            Arc::new(TracingReporter)
        };

        let installer =
            ReleaseInstaller::for_workspace(&workspace, environment, &settings.target_platform)?
                .reporter(reporter)
                .cancel(cancel)
                .max_parallel(self.max_parallel.unwrap_or(settings.max_parallel))
                .build();

        tracing::debug!(
            workspace = %workspace.root().display(),
            deployment = %workspace.deployment_id(),
            "Using deployment workspace"
        );
        let report = installer.install(&self.release, &manifest).await?;

        if !cli.quiet {
            print_report(&report);
        }
        Ok(())
    }
}

fn print_report(report: &InstallReport) {
    println!(
        "{} Installed release {}/{}",
        "✓".green().bold(),
        report.release.bold(),
        report.version
    );
    println!(
        "  packages: {} compiled, {} cached",
        report.packages_compiled, report.packages_cached
    );
    println!(
        "  templates: {} rendered, {} cached",
        report.templates_rendered(),
        report.templates_cached()
    );
    for job in &report.jobs {
        let source = if job.cached {
            "cached".dimmed()
        } else {
            "rendered".normal()
        };
        println!("  {} {} ({source})", job.job.cyan(), job.fingerprint.short());
    }
}
