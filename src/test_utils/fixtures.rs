//! Release and manifest fixtures written to disk.

use anyhow::Result;
use serde_json::{Map, Value, json};
use std::fs;
use std::path::{Path, PathBuf};

use crate::compiler::command::PACKAGING_SCRIPT;
use crate::release::reader::{JOB_SPEC, RELEASE_MANIFEST};

/// A package of a [`ReleaseFixture`].
#[derive(Clone, Debug)]
pub struct PackageFixture {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<String>,
    pub packaging: String,
    /// Extra source files, relative path to content
    pub files: Vec<(String, String)>,
}

impl PackageFixture {
    /// A package whose packaging script records its name in the install target.
    pub fn new(name: &str, dependencies: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0".to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            packaging: format!("echo {name} > \"$BOSH_INSTALL_TARGET/{name}.built\"\n"),
            files: Vec::new(),
        }
    }

    /// Replace the packaging script.
    pub fn packaging(mut self, script: &str) -> Self {
        self.packaging = script.to_string();
        self
    }

    /// Add a source file.
    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }
}

/// A job of a [`ReleaseFixture`].
#[derive(Clone, Debug)]
pub struct JobFixture {
    pub name: String,
    pub packages: Vec<String>,
    /// (source, destination, content)
    pub templates: Vec<(String, String, String)>,
    /// Declared properties with optional defaults
    pub properties: Vec<(String, Option<Value>)>,
    pub monit: Option<String>,
}

impl JobFixture {
    pub fn new(name: &str, packages: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            packages: packages.iter().map(|p| p.to_string()).collect(),
            templates: Vec::new(),
            properties: Vec::new(),
            monit: None,
        }
    }

    pub fn template(mut self, source: &str, destination: &str, content: &str) -> Self {
        self.templates.push((source.to_string(), destination.to_string(), content.to_string()));
        self
    }

    pub fn property(mut self, name: &str, default: Option<Value>) -> Self {
        self.properties.push((name.to_string(), default));
        self
    }

    pub fn monit(mut self, content: &str) -> Self {
        self.monit = Some(content.to_string());
        self
    }
}

/// Builds an extracted release directory.
///
/// ```rust,no_run
/// use relstrap::test_utils::{JobFixture, PackageFixture, ReleaseFixture};
///
/// # fn example(dir: &std::path::Path) -> anyhow::Result<()> {
/// let root = ReleaseFixture::new("director", "1")
///     .package(PackageFixture::new("base", &[]))
///     .package(PackageFixture::new("app", &["base"]))
///     .job(JobFixture::new("web", &["app"]).template("conf.tera", "config/web.conf", "ok"))
///     .write(dir)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ReleaseFixture {
    pub name: String,
    pub version: String,
    pub packages: Vec<PackageFixture>,
    pub jobs: Vec<JobFixture>,
}

impl ReleaseFixture {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            packages: Vec::new(),
            jobs: Vec::new(),
        }
    }

    pub fn package(mut self, package: PackageFixture) -> Self {
        self.packages.push(package);
        self
    }

    pub fn job(mut self, job: JobFixture) -> Self {
        self.jobs.push(job);
        self
    }

    /// Write the release below `dir` and return its root.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let root = dir.to_path_buf();
        fs::create_dir_all(&root)?;

        let manifest = json!({
            "name": self.name,
            "version": self.version,
            "packages": self.packages.iter().map(|p| json!({
                "name": p.name,
                "version": p.version,
                "dependencies": p.dependencies,
            })).collect::<Vec<_>>(),
            "jobs": self.jobs.iter().map(|j| json!({ "name": j.name })).collect::<Vec<_>>(),
        });
        fs::write(root.join(RELEASE_MANIFEST), serde_yaml::to_string(&manifest)?)?;

        for package in &self.packages {
            let dir = root.join("packages").join(&package.name);
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(PACKAGING_SCRIPT), &package.packaging)?;
            for (path, content) in &package.files {
                let file = dir.join(path);
                if let Some(parent) = file.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(file, content)?;
            }
        }

        for job in &self.jobs {
            let dir = root.join("jobs").join(&job.name);
            fs::create_dir_all(dir.join("templates"))?;

            let mut templates = Map::new();
            for (source, destination, content) in &job.templates {
                templates.insert(source.clone(), Value::String(destination.clone()));
                fs::write(dir.join("templates").join(source), content)?;
            }
            let mut properties = Map::new();
            for (name, default) in &job.properties {
                let mut definition = Map::new();
                if let Some(default) = default {
                    definition.insert("default".to_string(), default.clone());
                }
                properties.insert(name.clone(), Value::Object(definition));
            }
            let spec = json!({
                "name": job.name,
                "templates": templates,
                "packages": job.packages,
                "properties": properties,
            });
            fs::write(dir.join(JOB_SPEC), serde_yaml::to_string(&spec)?)?;

            if let Some(monit) = &job.monit {
                fs::write(dir.join("monit"), monit)?;
            }
        }

        Ok(root)
    }
}

/// Deployment manifest YAML selecting `jobs` with global `properties`.
pub fn manifest_yaml(name: &str, jobs: &[&str], properties: Value) -> String {
    let manifest = json!({
        "name": name,
        "jobs": jobs.iter().map(|j| json!({ "name": j })).collect::<Vec<_>>(),
        "properties": properties,
    });
    serde_yaml::to_string(&manifest).unwrap_or_default()
}
