//! `relstrap cache`: inspect the artifact caches of a workspace.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use super::CliConfig;
use crate::cache::ArtifactRepo;
use crate::config::{DeploymentWorkspace, InstallerConfig};

/// Cache management commands.
#[derive(Args, Debug)]
pub struct CacheCommand {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
enum CacheSubcommand {
    /// List package and template cache entries.
    List {
        /// Workspace directory (overrides the config file)
        #[arg(long, value_name = "DIR")]
        workspace: Option<PathBuf>,
    },
}

impl CacheCommand {
    pub async fn execute(self, settings: &InstallerConfig, _cli: &CliConfig) -> Result<()> {
        match self.command {
            CacheSubcommand::List {
                workspace,
            } => {
                let root = match workspace {
                    Some(dir) => dir,
                    None => settings.workspace_path()?,
                };
                list(&DeploymentWorkspace::open(root)?)
            }
        }
    }
}

fn list(workspace: &DeploymentWorkspace) -> Result<()> {
    let caches = [
        ArtifactRepo::open("packages", workspace.package_cache_path())?,
        ArtifactRepo::open("templates", workspace.template_cache_path())?,
    ];

    for cache in &caches {
        let entries = cache.list()?;
        println!("{} ({} entries)", cache.kind().bold(), entries.len());
        if entries.is_empty() {
            println!("  {}", "(empty)".dimmed());
        }
        for (fingerprint, entry) in entries {
            println!(
                "  {}  {}  {}",
                fingerprint.as_str().cyan(),
                entry.blob.id,
                entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            );
        }
    }
    Ok(())
}
