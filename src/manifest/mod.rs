//! Deployment manifest parsing and property lookup.
//!
//! The deployment manifest names the deployment, selects which release jobs
//! are deployed, and binds the properties their templates consume:
//!
//! ```yaml
//! name: my-director
//! jobs:
//!   - name: web
//!     properties:
//!       db:
//!         port: 6432
//! properties:
//!   db:
//!     host: 10.0.0.5
//! ```
//!
//! Job-level properties override global ones. Dotted property names such as
//! `db.port` are resolved first as a literal key, then by walking nested maps.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// A parsed deployment manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    /// Deployment name
    pub name: String,
    /// Jobs to deploy, in install order
    #[serde(default)]
    pub jobs: Vec<JobBinding>,
    /// Properties visible to every job
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A job selected by the manifest, with its job-level property overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobBinding {
    /// Name of a job in the release
    pub name: String,
    /// Properties that apply to this job only
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl DeploymentManifest {
    /// Parse a manifest from YAML text.
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid deployment manifest syntax")
    }

    /// Load a manifest from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read deployment manifest: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse deployment manifest: {}", path.display()))
    }

    /// Names of the selected jobs, in manifest order.
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// The binding for `job`, if the manifest selects it.
    pub fn job(&self, job: &str) -> Option<&JobBinding> {
        self.jobs.iter().find(|j| j.name == job)
    }

    /// Resolve a property for `job`.
    ///
    /// Job-level bindings win over global ones. Returns `None` when neither
    /// binds the name; declared defaults are applied by the renderer.
    pub fn lookup(&self, job: &str, property: &str) -> Option<&Value> {
        self.job(job)
            .and_then(|binding| lookup_dotted(&binding.properties, property))
            .or_else(|| lookup_dotted(&self.properties, property))
    }

    /// Every property name bound for `job`, flattened to dotted form and sorted.
    ///
    /// Used for "did you mean" suggestions when a property is missing.
    pub fn bound_names(&self, job: &str) -> Vec<String> {
        let mut names = Vec::new();
        flatten_names("", &self.properties, &mut names);
        if let Some(binding) = self.job(job) {
            flatten_names("", &binding.properties, &mut names);
        }
        names.sort();
        names.dedup();
        names
    }
}

/// Resolve a dotted property name in one property map.
///
/// An exact key match wins; otherwise each segment descends one nested map.
pub fn lookup_dotted<'a>(map: &'a Map<String, Value>, property: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(property) {
        return Some(value);
    }

    let mut segments = property.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn flatten_names(prefix: &str, map: &Map<String, Value>, out: &mut Vec<String>) {
    for (key, value) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_names(&name, nested, out),
            _ => out.push(name),
        }
    }
}
