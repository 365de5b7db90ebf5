//! Command-line interface for relstrap.
//!
//! A thin surface over the library: every command loads configuration,
//! wires collaborators explicitly and calls into the core.
//!
//! # Commands
//!
//! - `install` - compile, render and install a release for a deployment manifest
//! - `validate` - extract and validate a release without compiling anything
//! - `cache list` - show the package and template cache entries of a workspace
//!
//! # Global Options
//!
//! - `--verbose` - debug logging
//! - `--quiet` - errors only, no progress bars
//! - `--no-progress` - log lines instead of progress bars
//! - `--config <PATH>` - alternative user configuration file
//!
//! ```bash
//! relstrap install ./director-1.tgz --manifest deployment.yml
//! relstrap --verbose install ./director --manifest deployment.yml --max-parallel 4
//! relstrap validate ./director-1.tgz --manifest deployment.yml
//! relstrap cache list --workspace /srv/relstrap
//! ```

pub mod cache;
pub mod install;
pub mod validate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::InstallerConfig;
use crate::core::CancelFlag;

/// Settings derived from the global flags, handed to every command.
///
/// ```rust,ignore
/// let config = CliConfig::new();
/// assert_eq!(config.log_level, None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Tracing filter directive; `None` disables logging.
    pub log_level: Option<String>,

    /// Use log lines instead of progress bars.
    pub no_progress: bool,

    /// Suppress the summary printed after a command.
    pub quiet: bool,

    /// Custom path to the user configuration file.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` takes precedence over the level chosen by flags. Calling
    /// this more than once is harmless.
    pub fn init_logging(&self) {
        let Some(level) = &self.log_level else {
            return;
        };
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(format!("relstrap={level}"))
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Whether progress bars should be drawn.
    pub fn show_progress(&self) -> bool {
        !self.no_progress && !self.quiet
    }
}

/// Bootstrap a deployment from a software release.
#[derive(Parser)]
#[command(
    name = "relstrap",
    about = "Compile, render and install a release onto a single-instance deployment",
    version,
    long_about = "relstrap compiles the packages of a release in dependency order, renders its job \
                  templates against a deployment manifest and installs the result. Compiled \
                  packages and rendered templates are cached, so repeated runs only redo what changed."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the user configuration file (default: ~/.relstrap/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Disable progress bars.
    ///
    /// Also honored through the `RELSTRAP_NO_PROGRESS` environment variable.
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile, render and install a release.
    ///
    /// See [`install::InstallCommand`].
    Install(install::InstallCommand),

    /// Extract and validate a release against a deployment manifest.
    ///
    /// See [`validate::ValidateCommand`].
    Validate(validate::ValidateCommand),

    /// Inspect the artifact caches of a workspace.
    ///
    /// See [`cache::CacheCommand`].
    Cache(cache::CacheCommand),
}

impl Cli {
    /// Run the selected command; `cancel` is set when the operator interrupts.
    pub async fn execute(self, cancel: CancelFlag) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config, cancel).await
    }

    /// Translate the global flags into a [`CliConfig`].
    ///
    /// `--verbose` selects `debug`, `--quiet` disables logging, otherwise
    /// `info`.
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            quiet: self.quiet,
            config_path: self.config.clone(),
        }
    }

    /// Execute with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig, cancel: CancelFlag) -> Result<()> {
        config.init_logging();
        let settings = InstallerConfig::load_with_optional(config.config_path.clone()).await?;

        match self.command {
            Commands::Install(cmd) => cmd.execute(&settings, &config, cancel).await,
            Commands::Validate(cmd) => cmd.execute(&settings, &config).await,
            Commands::Cache(cmd) => cmd.execute(&settings, &config).await,
        }
    }
}
