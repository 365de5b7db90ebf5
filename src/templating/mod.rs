//! Job template rendering and packaging.
//!
//! [`TemplatesCompiler::compile`] renders a job with [`JobRenderer`],
//! fingerprints the rendered output together with the compiled packages the
//! job uses, and stores the packaged result through the template cache.
//!
//! The fingerprint covers only what ends up in the archive: rendered files,
//! the monit definition and the package list. The job name and the release
//! do not contribute, so identical jobs in different releases share one
//! cache entry.
//!
//! # Archive layout
//!
//! ```text
//! <destination>...   rendered templates at their declared destinations
//! job.json           packages the job needs (name, version, fingerprint)
//! monit              rendered process definition, if the job has one
//! ```

pub mod context;
pub mod renderer;

use serde::Serialize;
use std::sync::Arc;

use crate::archive::{self, ArchiveEntry};
use crate::blobstore::{BlobRef, Blobstore};
use crate::cache::ArtifactRepo;
use crate::compiler::CompiledPackages;
use crate::core::ReleaseError;
use crate::fingerprint::{Fingerprint, FingerprintHasher};
use crate::manifest::DeploymentManifest;
use crate::release::Job;

pub use context::PropertyContext;
pub use renderer::{JobRenderer, RenderedFile, RenderedJob};

/// Name of the package manifest inside a job archive.
pub const JOB_MANIFEST: &str = "job.json";
/// Name of the process definition inside a job archive.
pub const MONIT_FILE: &str = "monit";

/// A job's rendered, packaged and uploaded templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedJobArtifact {
    /// Job name
    pub job: String,
    /// Fingerprint the archive is cached under
    pub fingerprint: Fingerprint,
    /// Uploaded archive
    pub blob: BlobRef,
    /// Whether the archive came from the cache
    pub cached: bool,
}

#[derive(Serialize)]
struct JobManifest<'a> {
    packages: Vec<JobManifestPackage<'a>>,
}

#[derive(Serialize)]
struct JobManifestPackage<'a> {
    name: &'a str,
    version: &'a str,
    fingerprint: &'a str,
}

/// Renders, packages and caches job templates.
pub struct TemplatesCompiler {
    renderer: JobRenderer,
    blobstore: Arc<dyn Blobstore>,
    cache: Arc<ArtifactRepo>,
}

impl TemplatesCompiler {
    /// Create a compiler storing archives in `blobstore` and recording them
    /// in the template `cache`.
    pub fn new(
        renderer: JobRenderer,
        blobstore: Arc<dyn Blobstore>,
        cache: Arc<ArtifactRepo>,
    ) -> Self {
        Self {
            renderer,
            blobstore,
            cache,
        }
    }

    /// Render `job` against `manifest` and return its cached archive.
    ///
    /// Every package of the job must be in `compiled`. Rendering always
    /// runs, since the rendered output is the fingerprint input; upload and
    /// cache save are skipped on a hit. A rendering failure stores nothing.
    pub async fn compile(
        &self,
        job: &Job,
        manifest: &DeploymentManifest,
        compiled: &CompiledPackages,
    ) -> Result<RenderedJobArtifact, ReleaseError> {
        let rendered = self.render(job, manifest)?;
        self.store(job, &rendered, compiled).await
    }

    /// Render the templates of `job` in memory, without touching the
    /// blobstore or the cache.
    pub fn render(
        &self,
        job: &Job,
        manifest: &DeploymentManifest,
    ) -> Result<RenderedJob, ReleaseError> {
        self.renderer.render(job, manifest)
    }

    /// Archive the already `rendered` templates of `job` with the
    /// fingerprints of its packages, reusing the cached archive when the
    /// fingerprint is known.
    pub async fn store(
        &self,
        job: &Job,
        rendered: &RenderedJob,
        compiled: &CompiledPackages,
    ) -> Result<RenderedJobArtifact, ReleaseError> {
        let mut packages = Vec::with_capacity(job.packages.len());
        for name in &job.packages {
            let package = compiled.get(name).ok_or_else(|| ReleaseError::TemplateRender {
                job: job.name.clone(),
                template: JOB_MANIFEST.to_string(),
                reason: format!("package '{name}' has not been compiled"),
            })?;
            packages.push(JobManifestPackage {
                name: &package.name,
                version: &package.version,
                fingerprint: package.fingerprint.as_str(),
            });
        }
        packages.sort_by(|a, b| a.name.cmp(b.name));

        let fingerprint = template_fingerprint(rendered, &packages);
        if let Some(entry) = self.cache.find(&fingerprint)? {
            tracing::debug!(
                job = %job.name,
                fingerprint = %fingerprint.short(),
                "Template cache hit"
            );
            return Ok(RenderedJobArtifact {
                job: job.name.clone(),
                fingerprint,
                blob: entry.blob,
                cached: true,
            });
        }

        let bytes = package_job(rendered, &packages).map_err(|e| ReleaseError::TemplateRender {
            job: job.name.clone(),
            template: JOB_MANIFEST.to_string(),
            reason: format!("failed to package rendered templates: {e:#}"),
        })?;

        let blob = self.blobstore.put(bytes).await.map_err(|e| {
            ReleaseError::from_collaborator(e, |reason| ReleaseError::UploadFailed {
                subject: job.name.clone(),
                reason,
            })
        })?;
        let entry = self.cache.save(&fingerprint, blob)?;

        tracing::info!(
            job = %job.name,
            files = rendered.files.len(),
            fingerprint = %fingerprint.short(),
            "Rendered job templates"
        );
        Ok(RenderedJobArtifact {
            job: job.name.clone(),
            fingerprint,
            blob: entry.blob,
            cached: false,
        })
    }
}

fn template_fingerprint(
    rendered: &RenderedJob,
    packages: &[JobManifestPackage<'_>],
) -> Fingerprint {
    let mut hasher = FingerprintHasher::new("job-templates");
    for file in &rendered.files {
        hasher
            .field("destination", file.destination.as_bytes())
            .field("content", file.content.as_bytes())
            .field("executable", &[u8::from(file.executable)]);
    }
    for package in packages {
        hasher
            .field("package", package.name.as_bytes())
            .field("package-version", package.version.as_bytes())
            .field("package-fingerprint", package.fingerprint.as_bytes());
    }
    if let Some(monit) = &rendered.monit {
        hasher.field("monit", monit.as_bytes());
    }
    hasher.finish()
}

fn package_job(
    rendered: &RenderedJob,
    packages: &[JobManifestPackage<'_>],
) -> anyhow::Result<Vec<u8>> {
    let mut entries: Vec<ArchiveEntry> = rendered
        .files
        .iter()
        .map(|file| ArchiveEntry {
            path: file.destination.clone(),
            content: file.content.clone().into_bytes(),
            executable: file.executable,
        })
        .collect();

    let manifest = serde_json::to_vec_pretty(&JobManifest {
        packages: packages
            .iter()
            .map(|p| JobManifestPackage {
                name: p.name,
                version: p.version,
                fingerprint: p.fingerprint,
            })
            .collect(),
    })?;
    entries.push(ArchiveEntry::file(JOB_MANIFEST, manifest));
    if let Some(monit) = &rendered.monit {
        entries.push(ArchiveEntry::file(MONIT_FILE, monit.clone()));
    }

    archive::pack_entries(&entries)
}
