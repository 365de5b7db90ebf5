//! The release installer pipeline.
//!
//! [`ReleaseInstaller`] takes a release and a deployment manifest through
//! the stages of [`InstallStage`], strictly in order:
//!
//! 1. **Extracted**: the [`ReleaseExtractor`] parses the release
//! 2. **Validated**: the [`ReleaseValidator`] accepts it, every job the
//!    manifest selects exists and renders against the manifest's properties
//!    (in memory, so a missing property fails before anything is compiled)
//! 3. **DependenciesOrdered**: [`DependencyAnalysis`] orders all packages
//! 4. **PackagesCompiled**: [`ReleasePackagesCompiler`] compiles them through
//!    the package cache
//! 5. **TemplatesRendered**: [`TemplatesCompiler`] archives the rendered jobs
//!    with their package fingerprints through the template cache
//! 6. **Installed**: [`JobInstaller`] places packages and templates, job by
//!    job in manifest order
//!
//! A failing stage stops the run and is returned as an [`InstallFailure`]
//! naming the stage and, where there is one, the package or job. Nothing is
//! retried; running the installer again reuses every cached artifact, so a
//! re-run of an unchanged release and manifest only validates and installs.
//!
//! All collaborators are handed in through [`ReleaseInstaller::builder`].
//! The installer itself keeps no state between runs.

pub mod extractor;
pub mod job;

use std::path::Path;
use std::sync::Arc;

use crate::blobstore::{Blobstore, LocalBlobstore};
use crate::cache::ArtifactRepo;
use crate::compiler::{
    CompilationEnvironment, CompiledPackages, PackageCompiler, ReleasePackagesCompiler,
};
use crate::config::DeploymentWorkspace;
use crate::core::{CancelFlag, InstallFailure, InstallStage, ReleaseError};
use crate::events::{InstallReporter, StepOutcome, TracingReporter};
use crate::manifest::DeploymentManifest;
use crate::release::{
    ArchiveReleaseExtractor, CompositeValidator, Job, Release, ReleaseExtractor, ReleaseValidator,
};
use crate::resolver::DependencyAnalysis;
use crate::templating::{JobRenderer, RenderedJob, RenderedJobArtifact, TemplatesCompiler};

pub use extractor::{ArtifactInstaller, BlobExtractor};
pub use job::{INSTALLED_MARKER, JobInstaller};

#[cfg(test)]
mod tests;

/// Summary of a successful installer run.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Release name
    pub release: String,
    /// Release version
    pub version: String,
    /// Number of packages in the release
    pub packages: usize,
    /// Packages compiled by this run
    pub packages_compiled: usize,
    /// Packages served from the package cache
    pub packages_cached: usize,
    /// Rendered template artifacts, in manifest job order
    pub jobs: Vec<RenderedJobArtifact>,
}

impl InstallReport {
    /// Jobs whose templates were rendered and uploaded by this run.
    pub fn templates_rendered(&self) -> usize {
        self.jobs.iter().filter(|j| !j.cached).count()
    }

    /// Jobs whose templates came from the template cache.
    pub fn templates_cached(&self) -> usize {
        self.jobs.iter().filter(|j| j.cached).count()
    }

    /// Installed job names, in installation order.
    pub fn installed_jobs(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.job.as_str()).collect()
    }
}

/// Sequences extraction, validation, compilation, rendering and installation.
pub struct ReleaseInstaller {
    extractor: Arc<dyn ReleaseExtractor>,
    validator: Arc<dyn ReleaseValidator>,
    analysis: DependencyAnalysis,
    packages: Arc<PackageCompiler>,
    templates: TemplatesCompiler,
    jobs: JobInstaller,
    reporter: Arc<dyn InstallReporter>,
    cancel: CancelFlag,
    max_parallel: usize,
}

/// Builder for [`ReleaseInstaller`].
pub struct ReleaseInstallerBuilder {
    extractor: Arc<dyn ReleaseExtractor>,
    validator: Arc<dyn ReleaseValidator>,
    packages: Arc<PackageCompiler>,
    templates: TemplatesCompiler,
    jobs: JobInstaller,
    reporter: Arc<dyn InstallReporter>,
    cancel: CancelFlag,
    max_parallel: usize,
}

impl ReleaseInstallerBuilder {
    /// Report progress to `reporter` instead of the log.
    pub fn reporter(mut self, reporter: Arc<dyn InstallReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Stop starting new steps once `cancel` is set.
    pub fn cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Compile up to `max_parallel` independent packages at once.
    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Build the installer.
    pub fn build(self) -> ReleaseInstaller {
        ReleaseInstaller {
            extractor: self.extractor,
            validator: self.validator,
            analysis: DependencyAnalysis::new(),
            packages: self.packages,
            templates: self.templates,
            jobs: self.jobs,
            reporter: self.reporter,
            cancel: self.cancel,
            max_parallel: self.max_parallel,
        }
    }
}

impl ReleaseInstaller {
    /// Start building an installer from its required collaborators.
    ///
    /// Defaults: progress goes to the log, no cancellation, sequential
    /// compilation.
    pub fn builder(
        extractor: Arc<dyn ReleaseExtractor>,
        validator: Arc<dyn ReleaseValidator>,
        packages: Arc<PackageCompiler>,
        templates: TemplatesCompiler,
        jobs: JobInstaller,
    ) -> ReleaseInstallerBuilder {
        ReleaseInstallerBuilder {
            extractor,
            validator,
            packages,
            templates,
            jobs,
            reporter: Arc::new(TracingReporter),
            cancel: CancelFlag::new(),
            max_parallel: 1,
        }
    }

    /// Wire the standard collaborators of `workspace` around `environment`.
    ///
    /// Blobs live in the workspace blobstore, both caches in their workspace
    /// index files, releases are extracted below `tmp/` and checked by
    /// [`CompositeValidator::standard`].
    pub fn for_workspace(
        workspace: &DeploymentWorkspace,
        environment: Arc<dyn CompilationEnvironment>,
        target_platform: &str,
    ) -> anyhow::Result<ReleaseInstallerBuilder> {
        let blobstore: Arc<dyn Blobstore> = Arc::new(LocalBlobstore::new(workspace.blobs_dir()));
        let package_cache =
            Arc::new(ArtifactRepo::open("packages", workspace.package_cache_path())?);
        let template_cache =
            Arc::new(ArtifactRepo::open("templates", workspace.template_cache_path())?);

        let packages = Arc::new(PackageCompiler::new(
            environment,
            Arc::clone(&blobstore),
            package_cache,
            target_platform,
        ));
        let templates =
            TemplatesCompiler::new(JobRenderer::new(), Arc::clone(&blobstore), template_cache);
        let jobs = JobInstaller::new(
            Arc::new(BlobExtractor::new(blobstore)),
            workspace.packages_dir(),
            workspace.jobs_dir(),
        );

        Ok(Self::builder(
            Arc::new(ArchiveReleaseExtractor::new(workspace.tmp_dir())),
            Arc::new(CompositeValidator::standard()),
            packages,
            templates,
            jobs,
        ))
    }

    /// Extract the release at `release_path` and install it for `manifest`.
    pub async fn install(
        &self,
        release_path: &Path,
        manifest: &DeploymentManifest,
    ) -> Result<InstallReport, InstallFailure> {
        let stage = InstallStage::Extracted;
        self.cancel.check("extracting release").map_err(|e| InstallFailure::new(stage, e))?;
        self.reporter.stage_started(stage, 0);

        let extracted = self.extractor.extract(release_path).map_err(|e| {
            let subject = release_path.display().to_string();
            let error = ReleaseError::from_collaborator(e, |reason| ReleaseError::ExtractionFailed {
                subject: subject.clone(),
                target: subject.clone(),
                reason,
            });
            InstallFailure::new(stage, error)
        });
        let extracted = self.finish_stage(stage, extracted)?;

        self.install_release(&extracted.release, manifest).await
    }

    /// Install an already parsed release for `manifest`.
    pub async fn install_release(
        &self,
        release: &Release,
        manifest: &DeploymentManifest,
    ) -> Result<InstallReport, InstallFailure> {
        tracing::info!(
            release = %release.name,
            version = %release.version,
            deployment = %manifest.name,
            "Installing release"
        );

        let stage = InstallStage::Validated;
        self.reporter.stage_started(stage, 0);
        let (jobs, rendered) = self.finish_stage(stage, self.validate(release, manifest))?;

        let stage = InstallStage::DependenciesOrdered;
        self.reporter.stage_started(stage, 0);
        let ordered = self.analysis.analyze(&release.packages).map_err(|error| {
            let subject = match &error {
                ReleaseError::UnresolvedDependency { package, .. } => Some(package.clone()),
                _ => None,
            };
            InstallFailure {
                stage,
                subject,
                error,
            }
        });
        let ordered = self.finish_stage(stage, ordered)?;

        let stage = InstallStage::PackagesCompiled;
        self.reporter.stage_started(stage, ordered.len());
        let compiler = ReleasePackagesCompiler::new(
            Arc::clone(&self.packages),
            Arc::clone(&self.reporter),
            self.cancel.clone(),
            self.max_parallel,
        );
        let compiled = self.finish_stage(stage, compiler.compile(&ordered).await)?;

        let stage = InstallStage::TemplatesRendered;
        self.reporter.stage_started(stage, jobs.len());
        let rendered = self.store_jobs(&jobs, &rendered, &compiled).await;
        let rendered = self.finish_stage(stage, rendered)?;

        let stage = InstallStage::Installed;
        self.reporter.stage_started(stage, jobs.len());
        let installed = self.install_jobs(&jobs, &rendered, &compiled).await;
        self.finish_stage(stage, installed)?;

        let report = InstallReport {
            release: release.name.clone(),
            version: release.version.clone(),
            packages: compiled.len(),
            packages_compiled: compiled.len() - compiled.cached_count(),
            packages_cached: compiled.cached_count(),
            jobs: rendered,
        };
        tracing::info!(
            release = %report.release,
            compiled = report.packages_compiled,
            cached = report.packages_cached,
            jobs = report.jobs.len(),
            "Release installed"
        );
        Ok(report)
    }

    /// Run the validator, resolve the manifest's jobs in manifest order and
    /// render each of them in memory.
    fn validate<'r>(
        &self,
        release: &'r Release,
        manifest: &DeploymentManifest,
    ) -> Result<(Vec<&'r Job>, Vec<RenderedJob>), InstallFailure> {
        let stage = InstallStage::Validated;
        self.validator.validate(release, manifest).map_err(|e| InstallFailure::new(stage, e))?;

        let jobs = manifest
            .job_names()
            .into_iter()
            .map(|name| {
                release.job(name).ok_or_else(|| {
                    InstallFailure::for_subject(stage, name, ReleaseError::UnknownJob {
                        name: name.to_string(),
                        release: release.name.clone(),
                    })
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rendered = jobs
            .iter()
            .map(|job| {
                self.templates
                    .render(job, manifest)
                    .map_err(|e| InstallFailure::for_subject(stage, &job.name, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, rendered))
    }

    async fn store_jobs(
        &self,
        jobs: &[&Job],
        rendered: &[RenderedJob],
        compiled: &CompiledPackages,
    ) -> Result<Vec<RenderedJobArtifact>, InstallFailure> {
        let stage = InstallStage::TemplatesRendered;
        let mut artifacts = Vec::with_capacity(jobs.len());

        for (job, output) in jobs.iter().zip(rendered) {
            self.cancel
                .check(&format!("rendering job '{}'", job.name))
                .map_err(|e| InstallFailure::for_subject(stage, &job.name, e))?;
            self.reporter.step_started(stage, &job.name);

            match self.templates.store(job, output, compiled).await {
                Ok(artifact) => {
                    let outcome = if artifact.cached {
                        StepOutcome::Cached
                    } else {
                        StepOutcome::Done
                    };
                    self.reporter.step_finished(stage, &job.name, outcome);
                    artifacts.push(artifact);
                }
                Err(e) => {
                    self.reporter.step_finished(stage, &job.name, StepOutcome::Failed);
                    return Err(InstallFailure::for_subject(stage, &job.name, e));
                }
            }
        }
        Ok(artifacts)
    }

    async fn install_jobs(
        &self,
        jobs: &[&Job],
        rendered: &[RenderedJobArtifact],
        compiled: &CompiledPackages,
    ) -> Result<(), InstallFailure> {
        let stage = InstallStage::Installed;

        for (job, artifact) in jobs.iter().zip(rendered) {
            self.cancel
                .check(&format!("installing job '{}'", job.name))
                .map_err(|e| InstallFailure::for_subject(stage, &job.name, e))?;
            self.reporter.step_started(stage, &job.name);

            if let Err(e) = self.jobs.install(job, artifact, compiled).await {
                self.reporter.step_finished(stage, &job.name, StepOutcome::Failed);
                return Err(InstallFailure::for_subject(stage, &job.name, e));
            }
            self.reporter.step_finished(stage, &job.name, StepOutcome::Done);
        }
        Ok(())
    }

    fn finish_stage<T>(
        &self,
        stage: InstallStage,
        result: Result<T, InstallFailure>,
    ) -> Result<T, InstallFailure> {
        self.reporter.stage_finished(stage, result.is_ok());
        if let Err(failure) = &result {
            tracing::warn!("{failure}");
        }
        result
    }
}
