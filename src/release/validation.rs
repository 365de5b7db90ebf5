//! Release validation.
//!
//! Validators run after extraction and before any dependency analysis or
//! remote work. Each one checks a single concern and reports the first
//! violated rule as [`ReleaseError::ValidationFailed`]. Concrete validators
//! are picked when the installer is wired up; [`CompositeValidator`] chains
//! them.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use super::Release;
use crate::core::ReleaseError;
use crate::installer::INSTALLED_MARKER;
use crate::manifest::DeploymentManifest;
use crate::templating::{JOB_MANIFEST, MONIT_FILE};

/// Files the installer writes into every job directory itself.
const RESERVED_DESTINATIONS: [&str; 3] = [JOB_MANIFEST, MONIT_FILE, INSTALLED_MARKER];

/// A release check.
pub trait ReleaseValidator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Check `release` for deployment with `manifest`.
    fn validate(&self, release: &Release, manifest: &DeploymentManifest)
    -> Result<(), ReleaseError>;
}

fn violation(rule: &str, detail: impl Into<String>) -> ReleaseError {
    ReleaseError::ValidationFailed {
        rule: rule.to_string(),
        detail: detail.into(),
    }
}

/// Structural integrity of the release itself.
///
/// Rules:
/// - `release-name`, `release-version`: both present
/// - `package-name`, `job-name`: names are single path components
/// - `unique-package`, `unique-job`: no duplicate names
/// - `job-package`: every package a job needs is part of the release
/// - `template-path`: template sources and destinations are relative and
///   stay inside the job directory; destinations do not shadow `job.json`,
///   `monit` or the installed marker
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureValidator;

impl ReleaseValidator for StructureValidator {
    fn name(&self) -> &str {
        "structure"
    }

    fn validate(
        &self,
        release: &Release,
        _manifest: &DeploymentManifest,
    ) -> Result<(), ReleaseError> {
        if release.name.trim().is_empty() {
            return Err(violation("release-name", "release name is empty"));
        }
        if release.version.trim().is_empty() {
            return Err(violation(
                "release-version",
                format!("release '{}' has an empty version", release.name),
            ));
        }

        let mut seen = HashSet::new();
        for package in &release.packages {
            if !is_valid_name(&package.name) {
                return Err(violation(
                    "package-name",
                    format!("package name '{}' is not a plain directory name", package.name),
                ));
            }
            if !seen.insert(package.name.as_str()) {
                return Err(violation(
                    "unique-package",
                    format!("package '{}' is declared more than once", package.name),
                ));
            }
        }

        let mut jobs = HashSet::new();
        for job in &release.jobs {
            if !is_valid_name(&job.name) {
                return Err(violation(
                    "job-name",
                    format!("job name '{}' is not a plain directory name", job.name),
                ));
            }
            if !jobs.insert(job.name.as_str()) {
                return Err(violation(
                    "unique-job",
                    format!("job '{}' is declared more than once", job.name),
                ));
            }

            for package in &job.packages {
                if !seen.contains(package.as_str()) {
                    return Err(violation(
                        "job-package",
                        format!(
                            "job '{}' needs package '{}', which is not in the release",
                            job.name, package
                        ),
                    ));
                }
            }

            for template in &job.templates {
                for path in [&template.source, &template.destination] {
                    if !is_contained(path) {
                        return Err(violation(
                            "template-path",
                            format!(
                                "template '{}' of job '{}' uses path '{}', which must be relative and stay inside the job",
                                template.source, job.name, path
                            ),
                        ));
                    }
                }
                if is_reserved_destination(&template.destination) {
                    return Err(violation(
                        "template-path",
                        format!(
                            "template '{}' of job '{}' targets '{}', which the installer writes itself",
                            template.source, job.name, template.destination
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Whether `name` can be used as a directory name below `packages/` or
/// `jobs/`: non-empty, no separators, not `.` or `..`.
pub fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

/// Whether the relative `path` stays inside its base directory.
pub fn is_contained(path: &str) -> bool {
    normalize(path).is_some()
}

/// Resolve `.` and `..` in a relative path; `None` if it is absolute,
/// empty or climbs above its base.
fn normalize(path: &str) -> Option<PathBuf> {
    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.into_iter().collect())
    }
}

fn is_reserved_destination(destination: &str) -> bool {
    normalize(destination).is_some_and(|path| {
        RESERVED_DESTINATIONS
            .iter()
            .any(|reserved| path == Path::new(reserved))
    })
}

/// The release provides every job the deployment manifest selects.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequiredJobsValidator;

impl ReleaseValidator for RequiredJobsValidator {
    fn name(&self) -> &str {
        "required-jobs"
    }

    fn validate(
        &self,
        release: &Release,
        manifest: &DeploymentManifest,
    ) -> Result<(), ReleaseError> {
        if manifest.jobs.is_empty() {
            return Err(violation(
                "required-job",
                format!("deployment '{}' selects no jobs", manifest.name),
            ));
        }
        for name in manifest.job_names() {
            if release.job(name).is_none() {
                return Err(violation(
                    "required-job",
                    format!("release '{}' has no job '{}'", release.name, name),
                ));
            }
        }
        Ok(())
    }
}

/// Runs validators in order and stops at the first violation.
#[derive(Default)]
pub struct CompositeValidator {
    validators: Vec<Box<dyn ReleaseValidator>>,
}

impl CompositeValidator {
    /// Create an empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Structural checks followed by the required-jobs check.
    pub fn standard() -> Self {
        Self::new().with(StructureValidator).with(RequiredJobsValidator)
    }

    /// Append a validator.
    pub fn with(mut self, validator: impl ReleaseValidator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }
}

impl ReleaseValidator for CompositeValidator {
    fn name(&self) -> &str {
        "composite"
    }

    fn validate(
        &self,
        release: &Release,
        manifest: &DeploymentManifest,
    ) -> Result<(), ReleaseError> {
        for validator in &self.validators {
            tracing::debug!(
                validator = validator.name(),
                release = %release.name,
                "Validating release"
            );
            validator.validate(release, manifest)?;
        }
        Ok(())
    }
}
