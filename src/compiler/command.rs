//! Local compilation environment running each package's `packaging` script.
//!
//! For every compilation a scratch directory is created:
//!
//! ```text
//! <scratch>/compile/<package>/    copy of the package source, working directory
//! <scratch>/packages/<dep>/       compiled dependencies, unpacked
//! <scratch>/packages/<package>/   install target, archived after the build
//! ```
//!
//! The script runs as `<shell> -e packaging` with these variables set:
//! `BOSH_COMPILE_TARGET`, `BOSH_INSTALL_TARGET`, `BOSH_PACKAGE_NAME`,
//! `BOSH_PACKAGE_VERSION` and `BOSH_PACKAGES_DIR`.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use super::{CompilationEnvironment, CompileOutput, CompileRequest};
use crate::archive;
use crate::blobstore::Blobstore;
use crate::core::{BoxFuture, ReleaseError};
use crate::utils::fs::{copy_dir, ensure_dir};

/// Name of the build script at the root of every package.
pub const PACKAGING_SCRIPT: &str = "packaging";

/// Number of stderr lines kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs packaging scripts on the local machine.
pub struct CommandCompilationEnvironment {
    shell: PathBuf,
    scratch_dir: PathBuf,
    blobstore: Arc<dyn Blobstore>,
    timeout: Option<Duration>,
}

impl CommandCompilationEnvironment {
    /// Create an environment running scripts with `shell`, building below
    /// `scratch_dir` and fetching dependency artifacts from `blobstore`.
    pub fn new(
        shell: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        blobstore: Arc<dyn Blobstore>,
    ) -> Self {
        Self {
            shell: shell.into(),
            scratch_dir: scratch_dir.into(),
            blobstore,
            timeout: None,
        }
    }

    /// Fail builds that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run(&self, request: CompileRequest) -> Result<CompileOutput> {
        ensure_dir(&self.scratch_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("compile-{}-", request.package))
            .tempdir_in(&self.scratch_dir)
            .context("Failed to create compilation directory")?;

        let compile_dir = scratch.path().join("compile").join(&request.package);
        let packages_dir = scratch.path().join("packages");
        let install_dir = packages_dir.join(&request.package);

        let source = request.source_path.clone();
        let target = compile_dir.clone();
        tokio::task::spawn_blocking(move || copy_dir(&source, &target))
            .await
            .context("Source copy task failed")??;

        if !compile_dir.join(PACKAGING_SCRIPT).is_file() {
            bail!(
                "Package '{}' has no {} script in {}",
                request.package,
                PACKAGING_SCRIPT,
                request.source_path.display()
            );
        }

        for dependency in &request.dependencies {
            let bytes = self.blobstore.get(&dependency.blob).await.map_err(|e| {
                ReleaseError::from_collaborator(e, |reason| ReleaseError::DownloadFailed {
                    blob_id: dependency.blob.id.clone(),
                    reason: format!("compiled dependency '{}': {reason}", dependency.name),
                })
            })?;
            let dest = packages_dir.join(&dependency.name);
            tokio::task::spawn_blocking(move || archive::unpack(&bytes, &dest))
                .await
                .context("Dependency unpack task failed")??;
        }
        ensure_dir(&install_dir)?;

        self.run_script(&request, &compile_dir, &install_dir, &packages_dir).await?;
        Ok(CompileOutput::new(install_dir, Some(scratch)))
    }

    async fn run_script(
        &self,
        request: &CompileRequest,
        compile_dir: &Path,
        install_dir: &Path,
        packages_dir: &Path,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-e")
            .arg(PACKAGING_SCRIPT)
            .current_dir(compile_dir)
            .env("BOSH_COMPILE_TARGET", compile_dir)
            .env("BOSH_INSTALL_TARGET", install_dir)
            .env("BOSH_PACKAGE_NAME", &request.package)
            .env("BOSH_PACKAGE_VERSION", &request.version)
            .env("BOSH_PACKAGES_DIR", packages_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            package = %request.package,
            shell = %self.shell.display(),
            dir = %compile_dir.display(),
            "Running packaging script"
        );

        let output_future = cmd.output();
        let output = match self.timeout {
            Some(duration) => match tokio::time::timeout(duration, output_future).await {
                Ok(result) => result,
                Err(_) => bail!(
                    "packaging script of '{}' timed out after {} seconds",
                    request.package,
                    duration.as_secs()
                ),
            },
            None => output_future.await,
        }
        .with_context(|| format!("Failed to execute {}", self.shell.display()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            tracing::trace!(package = %request.package, "{}", stdout.trim());
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "packaging script exited with {}{}",
                output.status,
                stderr_tail(&stderr)
            );
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    format!(":\n{}", lines[start..].join("\n"))
}

impl CompilationEnvironment for CommandCompilationEnvironment {
    fn compile(&self, request: CompileRequest) -> BoxFuture<'_, CompileOutput> {
        Box::pin(self.run(request))
    }
}
