//! Parsing of extracted release directories.
//!
//! Expected layout:
//!
//! ```text
//! release.yml
//! packages/<name>/...           package source, including a `packaging` script
//! jobs/<name>/job.yml           templates, packages and properties of the job
//! jobs/<name>/templates/<src>
//! jobs/<name>/monit             optional
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::validation::{is_contained, is_valid_name};
use super::{Job, Package, PropertyDefinition, Release, TemplateFile};
use crate::fingerprint::directory_checksum;

/// File name of the release manifest at the release root.
pub const RELEASE_MANIFEST: &str = "release.yml";
/// File name of a job spec inside `jobs/<name>/`.
pub const JOB_SPEC: &str = "job.yml";

#[derive(Debug, Deserialize)]
struct ReleaseManifestFile {
    name: String,
    #[serde(deserialize_with = "string_or_number")]
    version: String,
    #[serde(default)]
    packages: Vec<PackageEntry>,
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct PackageEntry {
    name: String,
    #[serde(deserialize_with = "string_or_number")]
    version: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct JobSpecFile {
    name: String,
    #[serde(default)]
    templates: BTreeMap<String, String>,
    #[serde(default)]
    packages: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, PropertyDefinition>,
}

/// Versions are often written unquoted (`version: 3`).
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, found {other:?}"
        ))),
    }
}

/// Reads a [`Release`] from an extracted release directory.
#[derive(Debug, Clone)]
pub struct ReleaseReader {
    root: PathBuf,
}

impl ReleaseReader {
    /// Create a reader for the release rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    /// Parse the release.
    ///
    /// Job template sources are loaded into memory; package sources stay on
    /// disk and are identified by their tree checksum.
    pub fn read(&self) -> Result<Release> {
        let manifest_path = self.root.join(RELEASE_MANIFEST);
        let content = std::fs::read_to_string(&manifest_path).with_context(|| {
            format!("Failed to read release manifest: {}", manifest_path.display())
        })?;
        let manifest: ReleaseManifestFile = serde_yaml::from_str(&content).with_context(|| {
            format!("Invalid release manifest syntax in {}", manifest_path.display())
        })?;

        let mut packages = Vec::with_capacity(manifest.packages.len());
        for entry in manifest.packages {
            packages.push(self.read_package(entry)?);
        }

        let mut jobs = Vec::with_capacity(manifest.jobs.len());
        for entry in manifest.jobs {
            jobs.push(self.read_job(&entry.name)?);
        }

        tracing::debug!(
            release = %manifest.name,
            version = %manifest.version,
            packages = packages.len(),
            jobs = jobs.len(),
            "Read release"
        );

        Ok(Release {
            name: manifest.name,
            version: manifest.version,
            packages,
            jobs,
        })
    }

    fn read_package(&self, entry: PackageEntry) -> Result<Package> {
        if !is_valid_name(&entry.name) {
            bail!(
                "Package name '{}' in {} is not a plain directory name",
                entry.name,
                RELEASE_MANIFEST
            );
        }
        let source_path = self.root.join("packages").join(&entry.name);
        if !source_path.is_dir() {
            bail!(
                "Package '{}' is listed in {} but {} does not exist",
                entry.name,
                RELEASE_MANIFEST,
                source_path.display()
            );
        }
        let source_checksum = directory_checksum(&source_path)?;

        Ok(Package {
            name: entry.name,
            version: entry.version,
            dependencies: entry.dependencies,
            source_path,
            source_checksum,
        })
    }

    fn read_job(&self, name: &str) -> Result<Job> {
        if !is_valid_name(name) {
            bail!("Job name '{name}' in {RELEASE_MANIFEST} is not a plain directory name");
        }
        let job_dir = self.root.join("jobs").join(name);
        let spec_path = job_dir.join(JOB_SPEC);
        let content = std::fs::read_to_string(&spec_path)
            .with_context(|| format!("Failed to read job spec: {}", spec_path.display()))?;
        let spec: JobSpecFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid job spec syntax in {}", spec_path.display()))?;

        if spec.name != name {
            bail!(
                "Job spec {} declares name '{}' but is listed as '{}'",
                spec_path.display(),
                spec.name,
                name
            );
        }

        let mut templates = Vec::with_capacity(spec.templates.len());
        for (source, destination) in spec.templates {
            if !is_contained(&source) {
                bail!(
                    "Template source '{}' of job '{}' must be relative and stay inside {}",
                    source,
                    name,
                    job_dir.join("templates").display()
                );
            }
            let template_path = job_dir.join("templates").join(&source);
            let content = read_template(&template_path)?;
            templates.push(TemplateFile {
                source,
                destination,
                content,
            });
        }

        let monit_path = job_dir.join("monit");
        let monit = if monit_path.is_file() {
            Some(
                std::fs::read_to_string(&monit_path)
                    .with_context(|| format!("Failed to read {}", monit_path.display()))?,
            )
        } else {
            None
        };

        Ok(Job {
            name: spec.name,
            templates,
            packages: spec.packages,
            properties: spec.properties,
            monit,
        })
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job template: {}", path.display()))
}
