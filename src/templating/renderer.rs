//! Tera-based rendering of job templates.
//!
//! Templates read properties in two ways:
//!
//! - `{{ p(name="db.port") }}`, optionally with `default=...`
//! - `{{ properties.db.port }}` for declared properties
//!
//! Besides `properties`, the context holds `spec.name` (the job name) and
//! `spec.deployment` (the deployment name).
//!
//! A property with no manifest value and no default is a fatal
//! [`ReleaseError::MissingProperty`] naming the job and the property; other
//! template errors become [`ReleaseError::TemplateRender`].

use regex::Regex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use strsim::levenshtein;
use tera::{Context as TeraContext, Tera};

use super::context::PropertyContext;
use crate::core::ReleaseError;
use crate::manifest::DeploymentManifest;
use crate::release::Job;

/// Maximum Levenshtein distance, as a percentage of the name length, for a
/// bound property to be suggested.
const SIMILARITY_THRESHOLD_PERCENT: usize = 40;

/// One rendered file of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// Path below the installed job directory
    pub destination: String,
    /// Rendered content
    pub content: String,
    /// Files below `bin/` are installed executable
    pub executable: bool,
}

/// All rendered output of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedJob {
    /// Job name
    pub job: String,
    /// Rendered files, sorted by destination
    pub files: Vec<RenderedFile>,
    /// Rendered process definition
    pub monit: Option<String>,
}

/// Renders the templates of a job against a deployment manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobRenderer;

impl JobRenderer {
    /// Create a renderer.
    pub fn new() -> Self {
        Self
    }

    /// Render every template of `job`, plus its monit file.
    pub fn render(
        &self,
        job: &Job,
        manifest: &DeploymentManifest,
    ) -> Result<RenderedJob, ReleaseError> {
        let properties = PropertyContext::new(job, manifest);
        let declared: Vec<&str> = job.properties.keys().map(String::as_str).collect();

        let mut context = TeraContext::new();
        context.insert("properties", &properties.resolved_tree(&declared));
        context.insert(
            "spec",
            &json!({
                "name": job.name,
                "deployment": manifest.name,
            }),
        );

        let mut files = Vec::with_capacity(job.templates.len());
        for template in &job.templates {
            let content = render_one(&properties, &context, &template.content)
                .map_err(|failure| failure.into_error(&properties, &template.source))?;
            files.push(RenderedFile {
                executable: template.destination.starts_with("bin/"),
                destination: template.destination.clone(),
                content,
            });
        }
        files.sort_by(|a, b| a.destination.cmp(&b.destination));

        let monit = match &job.monit {
            Some(source) => Some(
                render_one(&properties, &context, source)
                    .map_err(|failure| failure.into_error(&properties, "monit"))?,
            ),
            None => None,
        };

        tracing::debug!(job = %job.name, files = files.len(), "Rendered job templates");
        Ok(RenderedJob {
            job: job.name.clone(),
            files,
            monit,
        })
    }
}

/// Why a single template failed.
enum RenderFailure {
    Missing(String),
    Tera(String),
}

impl RenderFailure {
    fn into_error(self, properties: &PropertyContext, template: &str) -> ReleaseError {
        match self {
            Self::Missing(property) => {
                let suggestions = find_similar_properties(&property, &properties.known_names());
                ReleaseError::MissingProperty {
                    job: properties.job().to_string(),
                    property,
                    suggestions,
                }
            }
            Self::Tera(reason) => ReleaseError::TemplateRender {
                job: properties.job().to_string(),
                template: template.to_string(),
                reason,
            },
        }
    }
}

fn render_one(
    properties: &PropertyContext,
    context: &TeraContext,
    source: &str,
) -> Result<String, RenderFailure> {
    let missing: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let mut tera = Tera::default();
    let lookup = properties.clone();
    let recorder = Arc::clone(&missing);
    tera.register_function("p", move |args: &HashMap<String, Value>| -> tera::Result<Value> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("p() requires a string `name` argument"))?;
        if let Some(value) = lookup.lookup(name) {
            return Ok(value);
        }
        if let Some(default) = args.get("default") {
            return Ok(default.clone());
        }
        if let Ok(mut names) = recorder.lock() {
            names.push(name.to_string());
        }
        Err(tera::Error::msg(format!("Property `{name}` is not set")))
    });

    tera.render_str(source, context).map_err(|error| {
        let recorded = missing.lock().ok().and_then(|names| names.first().cloned());
        if let Some(property) = recorded {
            return RenderFailure::Missing(property);
        }
        let message = format_tera_error(&error);
        match extract_variable_name(&message) {
            Some(variable) => match variable.strip_prefix("properties.") {
                Some(property) => RenderFailure::Missing(property.to_string()),
                None => RenderFailure::Tera(message),
            },
            None => RenderFailure::Tera(message),
        }
    })
}

/// Flatten a tera error chain into one message, without tera's internal
/// template name.
fn format_tera_error(error: &tera::Error) -> String {
    use std::error::Error;

    let mut messages = vec![error.to_string()];
    let mut current: Option<&dyn Error> = error.source();
    while let Some(err) = current {
        messages.push(err.to_string());
        current = err.source();
    }

    messages
        .into_iter()
        .map(|msg| {
            msg.replace("Failed to render '__tera_one_off'", "Template rendering failed")
                .replace("Failed to parse '__tera_one_off'", "Template syntax error")
                .replace(" while rendering '__tera_one_off'", "")
                .replace("'__tera_one_off'", "template")
        })
        .filter(|msg| !msg.trim().is_empty())
        .collect::<Vec<_>>()
        .join(": ")
}

fn extract_variable_name(error_msg: &str) -> Option<String> {
    // Pattern: "Variable `<name>` not found"
    let re = Regex::new(r"Variable `([^`]+)` not found").ok()?;
    if let Some(caps) = re.captures(error_msg)
        && let Some(m) = caps.get(1)
    {
        return Some(m.as_str().to_string());
    }

    let re = Regex::new(r"Unknown variable `([^`]+)`").ok()?;
    re.captures(error_msg).and_then(|caps| caps.get(1)).map(|m| m.as_str().to_string())
}

fn find_similar_properties(target: &str, available: &[String]) -> Vec<String> {
    let mut scored: Vec<_> =
        available.iter().map(|name| (name.clone(), levenshtein(target, name))).collect();
    scored.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    scored
        .into_iter()
        .filter(|(_, dist)| *dist <= target.len() * SIMILARITY_THRESHOLD_PERCENT / 100)
        .take(3)
        .map(|(name, _)| name)
        .collect()
}
