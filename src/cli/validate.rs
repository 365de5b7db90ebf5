//! `relstrap validate`: check a release without compiling anything.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::CliConfig;
use crate::config::InstallerConfig;
use crate::manifest::DeploymentManifest;
use crate::release::{
    ArchiveReleaseExtractor, CompositeValidator, ReleaseExtractor, ReleaseValidator,
};
use crate::resolver::DependencyAnalysis;

/// Extract a release, run the validators and order its packages.
///
/// Reports every error the installer would report before compiling.
#[derive(Args, Debug)]
pub struct ValidateCommand {
    /// Release directory or `.tgz` archive
    release: PathBuf,

    /// Deployment manifest selecting jobs
    #[arg(short, long, value_name = "FILE")]
    manifest: PathBuf,
}

impl ValidateCommand {
    pub async fn execute(self, _settings: &InstallerConfig, cli: &CliConfig) -> Result<()> {
        let manifest = DeploymentManifest::load(&self.manifest).await?;

        let scratch = tempfile::Builder::new()
            .prefix("relstrap-validate-")
            .tempdir()
            .context("Failed to create scratch directory")?;
        let extracted = ArchiveReleaseExtractor::new(scratch.path()).extract(&self.release)?;
        let release = &extracted.release;

        CompositeValidator::standard().validate(release, &manifest)?;
        let ordered = DependencyAnalysis::new().analyze(&release.packages)?;

        if !cli.quiet {
            println!(
                "{} Release {}/{} is valid for deployment '{}'",
                "✓".green().bold(),
                release.name.bold(),
                release.version,
                manifest.name
            );
            let order: Vec<&str> =
                ordered.packages().into_iter().map(|p| p.name.as_str()).collect();
            println!("  packages ({}): {}", order.len(), order.join(" → "));
            println!("  jobs: {}", manifest.job_names().join(", "));
        }
        Ok(())
    }
}
