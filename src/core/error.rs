//! Error handling for relstrap
//!
//! This module provides the error taxonomy of the installer pipeline and the
//! user-friendly error reporting used by the CLI. The error system follows two
//! principles:
//! 1. **Strongly-typed errors** so callers can match on the kind of failure
//! 2. **Stage-wrapped failures** so the surface layer can tell which pipeline
//!    stage failed and for which package or job
//!
//! # Architecture
//!
//! - [`ReleaseError`] - one variant per failure kind (modeling, remote
//!   execution, cache consistency, validation)
//! - [`InstallFailure`] - a [`ReleaseError`] annotated with the
//!   [`InstallStage`] and the offending package/job
//! - [`ErrorContext`] - message plus details and suggestion for CLI display
//!
//! Collaborators (blobstore, compilation environment, installers) report
//! failures as [`anyhow::Error`]. The core converts them into typed variants
//! with [`ReleaseError::from_collaborator`], keeping any [`ReleaseError`] a
//! collaborator raised itself.
//!
//! # Examples
//!
//! ```rust,no_run
//! use relstrap::core::{ReleaseError, user_friendly_error};
//!
//! let error = ReleaseError::CircularDependency {
//!     chain: "a → b → a".to_string(),
//! };
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use super::stage::InstallStage;

/// The error type for every failure the installer core can report.
///
/// # Error Categories
///
/// ## Modeling errors (detected before any remote work)
/// - [`UnresolvedDependency`] - a package names a dependency the release lacks
/// - [`CircularDependency`] - the package graph has a cycle
/// - [`MissingProperty`] - a template needs a property the manifest does not bind
/// - [`UnknownJob`] - the manifest selects a job the release does not contain
///
/// ## Remote execution errors
/// - [`CompilationFailed`], [`UploadFailed`], [`DownloadFailed`],
///   [`ExtractionFailed`], [`ChecksumMismatch`], [`TemplateRender`]
///
/// ## Cache consistency errors
/// - [`DuplicateFingerprint`] - a fingerprint is already bound to another blob
///
/// ## Validation errors
/// - [`ValidationFailed`] - a release validator rejected the release
///
/// [`UnresolvedDependency`]: ReleaseError::UnresolvedDependency
/// [`CircularDependency`]: ReleaseError::CircularDependency
/// [`MissingProperty`]: ReleaseError::MissingProperty
/// [`UnknownJob`]: ReleaseError::UnknownJob
/// [`CompilationFailed`]: ReleaseError::CompilationFailed
/// [`UploadFailed`]: ReleaseError::UploadFailed
/// [`DownloadFailed`]: ReleaseError::DownloadFailed
/// [`ExtractionFailed`]: ReleaseError::ExtractionFailed
/// [`ChecksumMismatch`]: ReleaseError::ChecksumMismatch
/// [`TemplateRender`]: ReleaseError::TemplateRender
/// [`DuplicateFingerprint`]: ReleaseError::DuplicateFingerprint
/// [`ValidationFailed`]: ReleaseError::ValidationFailed
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// A package declares a dependency that is not part of the release.
    #[error("Package '{package}' depends on '{dependency}', which is not part of the release")]
    UnresolvedDependency {
        /// Package declaring the dependency
        package: String,
        /// The dependency name that could not be resolved
        dependency: String,
    },

    /// Packages depend on each other in a cycle.
    ///
    /// Example: a depends on b, b depends on a. The chain always names at
    /// least one package of the cycle.
    #[error("Circular dependency detected: {chain}")]
    CircularDependency {
        /// String representation of the cycle, e.g. `a → b → a`
        chain: String,
    },

    /// A template references a property with no manifest value and no default.
    #[error("Job '{job}' requires property '{property}', which is not set in the deployment manifest")]
    MissingProperty {
        /// Job whose template needs the property
        job: String,
        /// Dotted property name, e.g. `db.port`
        property: String,
        /// Bound property names close to the missing one
        suggestions: Vec<String>,
    },

    /// A template could not be rendered for a reason other than a missing property.
    #[error("Failed to render template '{template}' of job '{job}': {reason}")]
    TemplateRender {
        /// Job owning the template
        job: String,
        /// Template source path within the job
        template: String,
        /// Renderer message
        reason: String,
    },

    /// The compilation environment reported a failed build.
    #[error("Compilation of package '{package}' failed: {reason}")]
    CompilationFailed {
        /// Package that failed to compile
        package: String,
        /// Build output or environment error
        reason: String,
    },

    /// Storing an artifact in the blobstore failed.
    #[error("Failed to upload artifact for '{subject}': {reason}")]
    UploadFailed {
        /// Package or job the artifact belongs to
        subject: String,
        /// Blobstore error
        reason: String,
    },

    /// Fetching a blob failed.
    #[error("Failed to download blob '{blob_id}': {reason}")]
    DownloadFailed {
        /// Blob identifier
        blob_id: String,
        /// Blobstore error
        reason: String,
    },

    /// A blob's content does not match its recorded checksum.
    #[error("Checksum mismatch for blob '{blob_id}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Blob identifier
        blob_id: String,
        /// Checksum recorded at upload time
        expected: String,
        /// Checksum of the bytes read back
        actual: String,
    },

    /// Unpacking an artifact onto the target failed.
    #[error("Failed to extract '{subject}' into {target}: {reason}")]
    ExtractionFailed {
        /// Package, job or release being extracted
        subject: String,
        /// Target directory
        target: String,
        /// Underlying error
        reason: String,
    },

    /// A fingerprint is already cached with a different blob.
    ///
    /// Two different artifacts for one fingerprint mean the fingerprint
    /// is wrong; the cache is left untouched.
    #[error(
        "Fingerprint {fingerprint} is already cached with blob '{existing}', refusing to record blob '{attempted}'"
    )]
    DuplicateFingerprint {
        /// The fingerprint being saved
        fingerprint: String,
        /// Blob id already recorded
        existing: String,
        /// Blob id that was rejected
        attempted: String,
    },

    /// A release validator rejected the release.
    #[error("Release validation failed ({rule}): {detail}")]
    ValidationFailed {
        /// Short identifier of the violated rule
        rule: String,
        /// Human readable description of the violation
        detail: String,
    },

    /// The deployment manifest selects a job the release does not provide.
    #[error("Job '{name}' is not part of release '{release}'")]
    UnknownJob {
        /// Job name from the deployment manifest
        name: String,
        /// Release name
        release: String,
    },

    /// The operator interrupted the run before a step started.
    #[error("Interrupted before '{step}' started")]
    Interrupted {
        /// The step that was not started
        step: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Plumbing failure with anyhow context
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReleaseError {
    /// Convert a collaborator failure into a typed error.
    ///
    /// If the collaborator already raised a [`ReleaseError`] (for example a
    /// [`ReleaseError::ChecksumMismatch`] from the blobstore) it is kept as is.
    /// Otherwise `fallback` builds the variant from the formatted error chain.
    pub fn from_collaborator(
        error: anyhow::Error,
        fallback: impl FnOnce(String) -> ReleaseError,
    ) -> ReleaseError {
        match error.downcast::<ReleaseError>() {
            Ok(typed) => typed,
            Err(other) => fallback(format!("{other:#}")),
        }
    }

    /// Whether this error is a modeling error, detectable before remote work.
    pub fn is_modeling_error(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedDependency { .. }
                | Self::CircularDependency { .. }
                | Self::MissingProperty { .. }
                | Self::UnknownJob { .. }
        )
    }
}

/// A failure of the installer pipeline.
///
/// Wraps the [`ReleaseError`] with the stage that failed and, where there is
/// one, the package or job being processed. The inner error keeps its kind so
/// callers can still match on it.
#[derive(Debug)]
pub struct InstallFailure {
    /// Stage that was running when the failure occurred
    pub stage: InstallStage,
    /// Package or job identity, if the failure concerns a single one
    pub subject: Option<String>,
    /// The underlying error
    pub error: ReleaseError,
}

impl InstallFailure {
    /// Create a failure for a stage as a whole.
    pub fn new(stage: InstallStage, error: ReleaseError) -> Self {
        Self {
            stage,
            subject: None,
            error,
        }
    }

    /// Create a failure for a specific package or job within a stage.
    pub fn for_subject(
        stage: InstallStage,
        subject: impl Into<String>,
        error: ReleaseError,
    ) -> Self {
        Self {
            stage,
            subject: Some(subject.into()),
            error,
        }
    }
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{} failed for '{}': {}", self.stage, subject, self.error),
            None => write!(f, "{} failed: {}", self.stage, self.error),
        }
    }
}

impl std::error::Error for InstallFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Error context wrapper that provides user-friendly error information
///
/// When displayed, errors show:
/// 1. **Error**: the main message in red
/// 2. **Details**: additional context in yellow (optional)
/// 3. **Suggestion**: actionable steps in green (optional)
#[derive(Debug)]
pub struct ErrorContext {
    /// The main error message
    pub message: String,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error to a user-friendly [`ErrorContext`] with actionable suggestions
///
/// Recognizes [`InstallFailure`], bare [`ReleaseError`] values and
/// [`std::io::Error`]; anything else is shown with its full context chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(failure) = error.downcast_ref::<InstallFailure>() {
        let ctx = ErrorContext::new(failure.to_string());
        return with_release_hints(ctx, &failure.error);
    }

    if let Some(release_error) = error.downcast_ref::<ReleaseError>() {
        let ctx = ErrorContext::new(release_error.to_string());
        return with_release_hints(ctx, release_error);
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        let ctx = ErrorContext::new(format!("{error:#}"));
        return match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => ctx
                .with_suggestion("Check ownership and permissions of the workspace directory"),
            std::io::ErrorKind::NotFound => ctx.with_suggestion(
                "Check that the file or directory exists and the path is correct",
            ),
            _ => ctx,
        };
    }

    ErrorContext::new(format!("{error:#}"))
}

fn with_release_hints(ctx: ErrorContext, error: &ReleaseError) -> ErrorContext {
    match error {
        ReleaseError::UnresolvedDependency {
            dependency,
            ..
        } => ctx.with_suggestion(format!(
            "Add package '{dependency}' to the release or remove it from the dependency list"
        )),
        ReleaseError::CircularDependency {
            ..
        } => ctx
            .with_details("Packages must form an acyclic graph to be compiled in order")
            .with_suggestion("Break the cycle by removing one of the dependencies listed above"),
        ReleaseError::MissingProperty {
            property,
            suggestions,
            ..
        } => {
            let ctx = ctx.with_suggestion(format!(
                "Set '{property}' under `properties` in the deployment manifest or give it a default in the job spec"
            ));
            if suggestions.is_empty() {
                ctx
            } else {
                ctx.with_details(format!("Similar bound properties: {}", suggestions.join(", ")))
            }
        }
        ReleaseError::CompilationFailed {
            ..
        }
        | ReleaseError::UploadFailed {
            ..
        }
        | ReleaseError::ExtractionFailed {
            ..
        }
        | ReleaseError::DownloadFailed {
            ..
        } => ctx.with_details(
            "Packages compiled before the failure stay cached; re-running resumes from there",
        ),
        ReleaseError::DuplicateFingerprint {
            ..
        } => ctx
            .with_details("Two different artifacts were produced for one fingerprint")
            .with_suggestion(
                "Inspect the workspace cache index; this indicates a fingerprinting defect",
            ),
        ReleaseError::ChecksumMismatch {
            ..
        } => ctx.with_suggestion(
            "The workspace blobstore is corrupted; remove the affected blob and its cache entry",
        ),
        ReleaseError::Interrupted {
            ..
        } => ctx.with_details("Re-run the same command to resume; completed work is cached"),
        _ => ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_failure_display_names_stage_and_subject() {
        let failure = InstallFailure::for_subject(
            InstallStage::PackagesCompiled,
            "app",
            ReleaseError::CompilationFailed {
                package: "app".to_string(),
                reason: "exit status 2".to_string(),
            },
        );
        let message = failure.to_string();
        assert!(message.contains("compiling packages"));
        assert!(message.contains("'app'"));
        assert!(message.contains("exit status 2"));
    }

    #[test]
    fn test_from_collaborator_keeps_typed_error() {
        let raised = anyhow::Error::from(ReleaseError::ChecksumMismatch {
            blob_id: "b1".to_string(),
            expected: "sha256:aa".to_string(),
            actual: "sha256:bb".to_string(),
        });
        let converted =
            ReleaseError::from_collaborator(raised, |reason| ReleaseError::DownloadFailed {
                blob_id: "b1".to_string(),
                reason,
            });
        assert!(matches!(converted, ReleaseError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_from_collaborator_wraps_foreign_error() {
        let raised = anyhow::anyhow!("disk full").context("writing blob");
        let converted =
            ReleaseError::from_collaborator(raised, |reason| ReleaseError::UploadFailed {
                subject: "base".to_string(),
                reason,
            });
        match converted {
            ReleaseError::UploadFailed {
                reason,
                ..
            } => {
                assert!(reason.contains("writing blob"));
                assert!(reason.contains("disk full"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_user_friendly_error_for_missing_property() {
        let error = ReleaseError::MissingProperty {
            job: "director".to_string(),
            property: "db.port".to_string(),
            suggestions: vec!["db.host".to_string()],
        };
        let ctx = user_friendly_error(anyhow::Error::from(error));
        assert!(ctx.message.contains("db.port"));
        assert!(ctx.suggestion.unwrap().contains("db.port"));
        assert!(ctx.details.unwrap().contains("db.host"));
    }

    #[test]
    fn test_modeling_error_classification() {
        assert!(
            ReleaseError::CircularDependency {
                chain: "a → a".to_string()
            }
            .is_modeling_error()
        );
        assert!(
            !ReleaseError::CompilationFailed {
                package: "a".to_string(),
                reason: String::new()
            }
            .is_modeling_error()
        );
    }
}
