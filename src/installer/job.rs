//! Installation of jobs and their packages onto the target filesystem.
//!
//! Layout below the install root:
//!
//! ```text
//! packages/<package>/      compiled package artifacts
//! jobs/<job>/              rendered templates, job.json, monit
//! jobs/<job>/.installed    template fingerprint, written last
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::extractor::ArtifactInstaller;
use crate::blobstore::BlobRef;
use crate::compiler::CompiledPackages;
use crate::core::ReleaseError;
use crate::fingerprint::Fingerprint;
use crate::release::Job;
use crate::templating::RenderedJobArtifact;
use crate::utils::fs::atomic_write;

/// Marker file recording a completely installed job.
pub const INSTALLED_MARKER: &str = ".installed";

/// Installs one job at a time: its packages in declared order, then its
/// rendered templates.
///
/// The marker of a job is removed before anything is touched and written
/// after the templates are in place, so a job without a matching marker was
/// interrupted and gets reinstalled by the next run.
pub struct JobInstaller {
    installer: Arc<dyn ArtifactInstaller>,
    packages_dir: PathBuf,
    jobs_dir: PathBuf,
}

impl JobInstaller {
    /// Create a job installer placing packages in `packages_dir` and jobs in
    /// `jobs_dir`.
    pub fn new(
        installer: Arc<dyn ArtifactInstaller>,
        packages_dir: impl Into<PathBuf>,
        jobs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            installer,
            packages_dir: packages_dir.into(),
            jobs_dir: jobs_dir.into(),
        }
    }

    /// Directory the job's templates are installed in.
    pub fn job_dir(&self, job: &str) -> PathBuf {
        self.jobs_dir.join(job)
    }

    /// Directory a package is installed in.
    pub fn package_dir(&self, package: &str) -> PathBuf {
        self.packages_dir.join(package)
    }

    /// Whether `job` is completely installed with templates `fingerprint`.
    pub fn is_installed(&self, job: &str, fingerprint: &Fingerprint) -> bool {
        std::fs::read_to_string(self.job_dir(job).join(INSTALLED_MARKER))
            .map(|recorded| recorded.trim() == fingerprint.as_str())
            .unwrap_or(false)
    }

    /// Install `job` with its packages from `compiled` and its rendered
    /// templates from `artifact`.
    pub async fn install(
        &self,
        job: &Job,
        artifact: &RenderedJobArtifact,
        compiled: &CompiledPackages,
    ) -> Result<(), ReleaseError> {
        let job_dir = self.job_dir(&job.name);
        let marker = job_dir.join(INSTALLED_MARKER);
        match std::fs::remove_file(&marker) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(extraction_failed(&job.name, &marker, format!("{e}"))),
        }

        for name in &job.packages {
            let package = compiled.get(name).ok_or_else(|| {
                extraction_failed(
                    name,
                    &self.package_dir(name),
                    format!("package of job '{}' has not been compiled", job.name),
                )
            })?;
            let target = self.package_dir(name);
            self.place(name, &package.blob, &target).await?;
            tracing::debug!(job = %job.name, package = %name, "Installed package");
        }

        self.place(&job.name, &artifact.blob, &job_dir).await?;
        atomic_write(&marker, artifact.fingerprint.as_str().as_bytes())
            .map_err(|e| extraction_failed(&job.name, &marker, format!("{e:#}")))?;

        tracing::info!(
            job = %job.name,
            packages = job.packages.len(),
            dir = %job_dir.display(),
            "Installed job"
        );
        Ok(())
    }

    async fn place(
        &self,
        subject: &str,
        blob: &BlobRef,
        target: &Path,
    ) -> Result<(), ReleaseError> {
        self.installer.install(blob, target).await.map_err(|e| {
            ReleaseError::from_collaborator(e, |reason| extraction_failed(subject, target, reason))
        })
    }
}

fn extraction_failed(subject: &str, target: &Path, reason: String) -> ReleaseError {
    ReleaseError::ExtractionFailed {
        subject: subject.to_string(),
        target: target.display().to_string(),
        reason,
    }
}
