//! Property binding for job templates.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::manifest::{DeploymentManifest, lookup_dotted};
use crate::release::Job;

/// Property values visible to one job's templates.
///
/// Resolution order for a dotted name: job-level manifest properties, global
/// manifest properties, then the default declared in the job spec.
#[derive(Debug, Clone, Default)]
pub struct PropertyContext {
    job: String,
    job_properties: Map<String, Value>,
    global_properties: Map<String, Value>,
    defaults: BTreeMap<String, Value>,
}

impl PropertyContext {
    /// Bind `job`'s properties from `manifest`.
    pub fn new(job: &Job, manifest: &DeploymentManifest) -> Self {
        let defaults = job
            .properties
            .iter()
            .filter_map(|(name, definition)| {
                definition.default.as_ref().map(|value| (name.clone(), value.clone()))
            })
            .collect();

        Self {
            job: job.name.clone(),
            job_properties: manifest
                .job(&job.name)
                .map(|binding| binding.properties.clone())
                .unwrap_or_default(),
            global_properties: manifest.properties.clone(),
            defaults,
        }
    }

    /// Name of the job the properties are bound for.
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Resolve a dotted property name.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        lookup_dotted(&self.job_properties, name)
            .or_else(|| lookup_dotted(&self.global_properties, name))
            .or_else(|| self.defaults.get(name))
            .cloned()
    }

    /// The declared properties with a resolved value, as a nested object.
    ///
    /// `db.port = 5432` becomes `{"db": {"port": 5432}}`. This is what
    /// templates see as `properties`.
    pub fn resolved_tree(&self, declared: &[&str]) -> Value {
        let mut root = Map::new();
        for name in declared {
            if let Some(value) = self.lookup(name) {
                insert_dotted(&mut root, name, value);
            }
        }
        Value::Object(root)
    }

    /// Every name that resolves to a value, flattened to dotted form, sorted.
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.defaults.keys().cloned().collect();
        flatten_names("", &self.global_properties, &mut names);
        flatten_names("", &self.job_properties, &mut names);
        names.sort();
        names.dedup();
        names
    }
}

fn insert_dotted(root: &mut Map<String, Value>, name: &str, value: Value) {
    let segments: Vec<&str> = name.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        // A scalar already bound at a parent path wins over nested names
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
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
