//! Compilation of every package of a release.

use futures::stream::{self, StreamExt};
use std::sync::Arc;

use super::{CompiledPackage, CompiledPackages, PackageCompiler};
use crate::core::{CancelFlag, InstallFailure, InstallStage, ReleaseError};
use crate::events::{InstallReporter, StepOutcome};
use crate::release::Package;
use crate::resolver::OrderedPackages;

const STAGE: InstallStage = InstallStage::PackagesCompiled;

/// Compiles the packages of a release in dependency order.
///
/// Packages are processed layer by layer (see
/// [`DependencyGraph::layers`](crate::resolver::DependencyGraph::layers)).
/// Within a layer up to `max_parallel` packages compile concurrently; with
/// `max_parallel = 1` compilation is strictly sequential. The first failure
/// stops the run: packages not yet started are never started, and packages
/// already compiled keep their cache entries.
pub struct ReleasePackagesCompiler {
    compiler: Arc<PackageCompiler>,
    reporter: Arc<dyn InstallReporter>,
    cancel: CancelFlag,
    max_parallel: usize,
}

impl ReleasePackagesCompiler {
    /// Create a release compiler. `max_parallel` is clamped to at least 1.
    pub fn new(
        compiler: Arc<PackageCompiler>,
        reporter: Arc<dyn InstallReporter>,
        cancel: CancelFlag,
        max_parallel: usize,
    ) -> Self {
        Self {
            compiler,
            reporter,
            cancel,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Compile every package of `ordered`.
    pub async fn compile(
        &self,
        ordered: &OrderedPackages<'_>,
    ) -> Result<CompiledPackages, InstallFailure> {
        let mut compiled = CompiledPackages::new();

        for layer in ordered.layers() {
            let finished = self.compile_layer(layer, ordered, &compiled).await?;
            for package in finished {
                compiled.insert(package);
            }
        }

        tracing::info!(
            packages = compiled.len(),
            cached = compiled.cached_count(),
            "Compiled release packages"
        );
        Ok(compiled)
    }

    async fn compile_layer(
        &self,
        layer: &[&Package],
        ordered: &OrderedPackages<'_>,
        compiled: &CompiledPackages,
    ) -> Result<Vec<CompiledPackage>, InstallFailure> {
        let mut results = stream::iter(layer.iter().copied())
            .map(|package| async move {
                let outcome = self.compile_one(package, ordered, compiled).await;
                (package, outcome)
            })
            .buffer_unordered(self.max_parallel);

        let mut finished = Vec::with_capacity(layer.len());
        while let Some((package, outcome)) = results.next().await {
            match outcome {
                Ok(compiled_package) => finished.push(compiled_package),
                Err(error) => {
                    tracing::warn!(package = %package.name, "Package compilation failed: {error}");
                    return Err(InstallFailure::for_subject(STAGE, &package.name, error));
                }
            }
        }
        Ok(finished)
    }

    async fn compile_one(
        &self,
        package: &Package,
        ordered: &OrderedPackages<'_>,
        compiled: &CompiledPackages,
    ) -> Result<CompiledPackage, ReleaseError> {
        self.cancel.check(&format!("compiling package '{}'", package.name))?;
        self.reporter.step_started(STAGE, &package.name);

        let transitive = ordered.transitive_dependencies(&package.name);
        let result = self.compiler.compile(package, compiled, &transitive).await;

        let outcome = match &result {
            Ok(p) if p.cached => StepOutcome::Cached,
            Ok(_) => StepOutcome::Done,
            Err(_) => StepOutcome::Failed,
        };
        self.reporter.step_finished(STAGE, &package.name, outcome);
        result
    }
}
