//! Package compilation with a fingerprint-keyed cache.
//!
//! [`PackageCompiler::compile`] is the unit of work: fingerprint the package,
//! return the cached artifact if there is one, otherwise delegate the build to
//! a [`CompilationEnvironment`], archive the result, upload it and record it
//! in the package cache. A cache entry is only written after the upload
//! succeeded, so an abandoned or failed compilation never leaves one behind.
//!
//! [`ReleasePackagesCompiler`](release::ReleasePackagesCompiler) runs this
//! for every package of a release in dependency order.
//!
//! # Module Layout
//!
//! - [`release`] - ordered, optionally layer-parallel compilation of a release
//! - [`command`] - local environment running each package's `packaging` script

pub mod command;
pub mod release;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::archive;
use crate::blobstore::{BlobRef, Blobstore};
use crate::cache::ArtifactRepo;
use crate::core::{BoxFuture, ReleaseError};
use crate::fingerprint::{Fingerprint, package_fingerprint};
use crate::release::Package;

pub use command::CommandCompilationEnvironment;
pub use release::ReleasePackagesCompiler;

/// A compiled dependency handed to the compilation environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDependency {
    /// Package name
    pub name: String,
    /// Package version
    pub version: String,
    /// Compiled artifact
    pub blob: BlobRef,
}

/// Everything a compilation environment needs to build one package.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Package name
    pub package: String,
    /// Package version
    pub version: String,
    /// Fingerprint the artifact will be cached under
    pub fingerprint: Fingerprint,
    /// Directory holding the package source
    pub source_path: PathBuf,
    /// Compiled artifacts of the package's transitive dependencies, sorted by name
    pub dependencies: Vec<CompiledDependency>,
    /// Identity of the platform the artifact is built for
    pub target_platform: String,
}

/// Build output of one package.
///
/// Holds the scratch directory the output lives in, if any, so it is removed
/// once the output has been archived.
#[derive(Debug)]
pub struct CompileOutput {
    install_dir: PathBuf,
    _scratch: Option<TempDir>,
}

impl CompileOutput {
    /// Output in `install_dir`, kept alive by `scratch`.
    pub fn new(install_dir: impl Into<PathBuf>, scratch: Option<TempDir>) -> Self {
        Self {
            install_dir: install_dir.into(),
            _scratch: scratch,
        }
    }

    /// Directory holding the installed build output.
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }
}

/// Executes the build of a single package.
///
/// Provisioning the environment is not part of this contract. An `Err`
/// means the build failed.
pub trait CompilationEnvironment: Send + Sync {
    /// Build the package described by `request`.
    fn compile(&self, request: CompileRequest) -> BoxFuture<'_, CompileOutput>;
}

/// A package with its compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPackage {
    /// Package name
    pub name: String,
    /// Package version
    pub version: String,
    /// Fingerprint the artifact is cached under
    pub fingerprint: Fingerprint,
    /// Compiled artifact
    pub blob: BlobRef,
    /// Whether the artifact came from the cache
    pub cached: bool,
}

/// Compiled artifacts of a release, keyed by package name.
///
/// Kept next to the read-only [`Release`](crate::release::Release) rather
/// than inside it.
#[derive(Debug, Clone, Default)]
pub struct CompiledPackages {
    packages: BTreeMap<String, CompiledPackage>,
}

impl CompiledPackages {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a compiled package.
    pub fn insert(&mut self, package: CompiledPackage) {
        self.packages.insert(package.name.clone(), package);
    }

    /// Look up a compiled package by name.
    pub fn get(&self, name: &str) -> Option<&CompiledPackage> {
        self.packages.get(name)
    }

    /// Compiled packages sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &CompiledPackage> {
        self.packages.values()
    }

    /// Number of compiled packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether nothing has been compiled.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// How many packages were served from the cache.
    pub fn cached_count(&self) -> usize {
        self.packages.values().filter(|p| p.cached).count()
    }
}

/// Compiles single packages through the package cache.
pub struct PackageCompiler {
    environment: Arc<dyn CompilationEnvironment>,
    blobstore: Arc<dyn Blobstore>,
    cache: Arc<ArtifactRepo>,
    target_platform: String,
}

impl PackageCompiler {
    /// Create a compiler.
    pub fn new(
        environment: Arc<dyn CompilationEnvironment>,
        blobstore: Arc<dyn Blobstore>,
        cache: Arc<ArtifactRepo>,
        target_platform: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            blobstore,
            cache,
            target_platform: target_platform.into(),
        }
    }

    /// Fingerprint `package` from its source and its direct dependencies'
    /// fingerprints, which must already be in `compiled`.
    pub fn fingerprint(
        &self,
        package: &Package,
        compiled: &CompiledPackages,
    ) -> Result<Fingerprint, ReleaseError> {
        let mut dependencies = BTreeMap::new();
        for name in &package.dependencies {
            let dependency = compiled.get(name).ok_or_else(|| not_compiled(package, name))?;
            dependencies.insert(name.clone(), dependency.fingerprint.clone());
        }
        Ok(package_fingerprint(&package.name, &package.source_checksum, &dependencies))
    }

    /// Compile `package`, or return its cached artifact.
    ///
    /// `compiled` must contain every package in `transitive_dependencies`;
    /// their artifacts are handed to the environment on a cache miss.
    pub async fn compile(
        &self,
        package: &Package,
        compiled: &CompiledPackages,
        transitive_dependencies: &BTreeSet<String>,
    ) -> Result<CompiledPackage, ReleaseError> {
        let fingerprint = self.fingerprint(package, compiled)?;

        if let Some(entry) = self.cache.find(&fingerprint)? {
            tracing::debug!(
                package = %package.name,
                fingerprint = %fingerprint.short(),
                "Package cache hit"
            );
            return Ok(CompiledPackage {
                name: package.name.clone(),
                version: package.version.clone(),
                fingerprint,
                blob: entry.blob,
                cached: true,
            });
        }

        let mut dependencies = Vec::with_capacity(transitive_dependencies.len());
        for name in transitive_dependencies {
            let dependency = compiled.get(name).ok_or_else(|| not_compiled(package, name))?;
            dependencies.push(CompiledDependency {
                name: dependency.name.clone(),
                version: dependency.version.clone(),
                blob: dependency.blob.clone(),
            });
        }

        tracing::info!(
            package = %package.name,
            version = %package.version,
            fingerprint = %fingerprint.short(),
            "Compiling package"
        );
        let request = CompileRequest {
            package: package.name.clone(),
            version: package.version.clone(),
            fingerprint: fingerprint.clone(),
            source_path: package.source_path.clone(),
            dependencies,
            target_platform: self.target_platform.clone(),
        };

        let output = self.environment.compile(request).await.map_err(|e| {
            ReleaseError::from_collaborator(e, |reason| ReleaseError::CompilationFailed {
                package: package.name.clone(),
                reason,
            })
        })?;

        let install_dir = output.install_dir().to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || archive::pack_dir(&install_dir))
            .await
            .map_err(|e| ReleaseError::CompilationFailed {
                package: package.name.clone(),
                reason: format!("archiving task failed: {e}"),
            })?
            .map_err(|e| ReleaseError::CompilationFailed {
                package: package.name.clone(),
                reason: format!("failed to archive build output: {e:#}"),
            })?;
        drop(output);

        let blob = self.blobstore.put(bytes).await.map_err(|e| {
            ReleaseError::from_collaborator(e, |reason| ReleaseError::UploadFailed {
                subject: package.name.clone(),
                reason,
            })
        })?;

        let entry = self.cache.save(&fingerprint, blob)?;
        Ok(CompiledPackage {
            name: package.name.clone(),
            version: package.version.clone(),
            fingerprint,
            blob: entry.blob,
            cached: false,
        })
    }
}

fn not_compiled(package: &Package, dependency: &str) -> ReleaseError {
    ReleaseError::CompilationFailed {
        package: package.name.clone(),
        reason: format!("dependency '{dependency}' has not been compiled yet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::LocalBlobstore;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes one file named after the package and records requests.
    #[derive(Default)]
    struct RecordingEnvironment {
        calls: AtomicUsize,
        requests: Mutex<Vec<CompileRequest>>,
        fail: bool,
    }

    impl CompilationEnvironment for RecordingEnvironment {
        fn compile(&self, request: CompileRequest) -> BoxFuture<'_, CompileOutput> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.requests.lock().unwrap().push(request.clone());
                if self.fail {
                    anyhow::bail!("make: *** [all] Error 2");
                }
                let scratch = TempDir::new()?;
                std::fs::write(scratch.path().join(&request.package), &request.version)?;
                Ok(CompileOutput::new(scratch.path().to_path_buf(), Some(scratch)))
            })
        }
    }

    struct Fixture {
        _temp: TempDir,
        environment: Arc<RecordingEnvironment>,
        cache: Arc<ArtifactRepo>,
        compiler: PackageCompiler,
    }

    fn fixture(fail: bool) -> Fixture {
        let temp = TempDir::new().unwrap();
        let environment = Arc::new(RecordingEnvironment {
            fail,
            ..Default::default()
        });
        let cache =
            Arc::new(ArtifactRepo::open("packages", temp.path().join("compiled.json")).unwrap());
        let compiler = PackageCompiler::new(
            environment.clone(),
            Arc::new(LocalBlobstore::new(temp.path().join("blobs"))),
            cache.clone(),
            "local",
        );
        Fixture {
            _temp: temp,
            environment,
            cache,
            compiler,
        }
    }

    fn package(name: &str, deps: &[&str], checksum: &str) -> Package {
        Package {
            name: name.to_string(),
            version: "1".to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            source_path: PathBuf::from("/src").join(name),
            source_checksum: checksum.to_string(),
        }
    }

    #[tokio::test]
    async fn test_second_compile_hits_cache() -> anyhow::Result<()> {
        let f = fixture(false);
        let base = package("base", &[], "sha256:01");

        let first = f.compiler.compile(&base, &CompiledPackages::new(), &BTreeSet::new()).await?;
        let second = f.compiler.compile(&base, &CompiledPackages::new(), &BTreeSet::new()).await?;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.blob, second.blob);
        assert_eq!(f.environment.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_dependencies_are_passed_to_environment() -> anyhow::Result<()> {
        let f = fixture(false);
        let libc = package("libc", &[], "sha256:01");
        let ruby = package("ruby", &["libc"], "sha256:02");
        let app = package("app", &["ruby"], "sha256:03");

        let mut compiled = CompiledPackages::new();
        let compiled_libc = f.compiler.compile(&libc, &compiled, &BTreeSet::new()).await?;
        compiled.insert(compiled_libc);
        let ruby_deps = BTreeSet::from(["libc".to_string()]);
        let compiled_ruby = f.compiler.compile(&ruby, &compiled, &ruby_deps).await?;
        compiled.insert(compiled_ruby);
        let app_deps = BTreeSet::from(["libc".to_string(), "ruby".to_string()]);
        f.compiler.compile(&app, &compiled, &app_deps).await?;

        let requests = f.environment.requests.lock().unwrap();
        let names: Vec<&str> = requests[2].dependencies.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["libc", "ruby"]);
        assert_eq!(requests[2].target_platform, "local");
        Ok(())
    }

    #[tokio::test]
    async fn test_dependency_change_forces_recompile() -> anyhow::Result<()> {
        let f = fixture(false);
        let deps = BTreeSet::from(["base".to_string()]);
        let app = package("app", &["base"], "sha256:10");

        let none = CompiledPackages::new();
        let no_deps = BTreeSet::new();
        let mut v1 = CompiledPackages::new();
        v1.insert(f.compiler.compile(&package("base", &[], "sha256:01"), &none, &no_deps).await?);
        f.compiler.compile(&app, &v1, &deps).await?;

        let mut v2 = CompiledPackages::new();
        v2.insert(f.compiler.compile(&package("base", &[], "sha256:02"), &none, &no_deps).await?);
        let recompiled = f.compiler.compile(&app, &v2, &deps).await?;

        assert!(!recompiled.cached);
        assert_eq!(f.environment.calls.load(Ordering::SeqCst), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_compile_leaves_no_entry() -> anyhow::Result<()> {
        let f = fixture(true);
        let base = package("base", &[], "sha256:01");

        let none = CompiledPackages::new();
        let err = f.compiler.compile(&base, &none, &BTreeSet::new()).await.unwrap_err();
        match err {
            ReleaseError::CompilationFailed {
                package,
                reason,
            } => {
                assert_eq!(package, "base");
                assert!(reason.contains("Error 2"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.cache.list()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_uncompiled_dependency_is_rejected() {
        let f = fixture(false);
        let app = package("app", &["base"], "sha256:01");

        let err =
            f.compiler.compile(&app, &CompiledPackages::new(), &BTreeSet::new()).await.unwrap_err();
        assert!(err.to_string().contains("has not been compiled"));
        assert_eq!(f.environment.calls.load(Ordering::SeqCst), 0);
    }
}
