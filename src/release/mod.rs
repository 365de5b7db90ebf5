//! Release data model.
//!
//! A [`Release`] is a versioned bundle of [`Package`]s and [`Job`]s. It is
//! built once by the [`reader`] from an extracted release directory and is
//! read-only afterwards; compiled artifacts are tracked next to it (see
//! [`crate::compiler::CompiledPackages`]) rather than inside it.
//!
//! # Module Layout
//!
//! - [`reader`] - parse `release.yml` and `jobs/*/job.yml` into the model
//! - [`extractor`] - unpack release tarballs ([`ReleaseExtractor`])
//! - [`validation`] - structural and deployment-specific release checks

pub mod extractor;
pub mod reader;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use extractor::{ArchiveReleaseExtractor, ExtractedRelease, ReleaseExtractor};
pub use reader::ReleaseReader;
pub use validation::{
    CompositeValidator, ReleaseValidator, RequiredJobsValidator, StructureValidator,
};

/// A parsed release.
#[derive(Debug, Clone)]
pub struct Release {
    /// Release name
    pub name: String,
    /// Release version as written in `release.yml`
    pub version: String,
    /// Packages in declaration order
    pub packages: Vec<Package>,
    /// Jobs in declaration order
    pub jobs: Vec<Job>,
}

impl Release {
    /// Look up a package by name.
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// A package: a named unit of source with declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Package name, unique within the release
    pub name: String,
    /// Package version
    pub version: String,
    /// Names of packages in the same release this package depends on
    pub dependencies: Vec<String>,
    /// Directory holding the package source (including the `packaging` script)
    pub source_path: PathBuf,
    /// `sha256:` checksum of the source tree
    pub source_checksum: String,
}

/// A deployable role: required packages plus configuration templates.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Job name, unique within the release
    pub name: String,
    /// Templates to render, sorted by source path
    pub templates: Vec<TemplateFile>,
    /// Names of the packages the job needs on the target
    pub packages: Vec<String>,
    /// Declared properties schema
    pub properties: BTreeMap<String, PropertyDefinition>,
    /// Process definition shipped with the rendered job, if any
    pub monit: Option<String>,
}

/// One template of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    /// Path of the template below the job's `templates/` directory
    pub source: String,
    /// Path of the rendered file below the installed job directory
    pub destination: String,
    /// Raw template text
    pub content: String,
}

/// Declaration of a job property in `job.yml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    /// Value used when the deployment manifest does not bind the property
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
}
