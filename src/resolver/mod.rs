//! Dependency analysis for release packages.
//!
//! [`DependencyAnalysis`] turns the package set of a release into a
//! compilation order. It fails fast, before any compilation starts, when a
//! package names a dependency the release does not contain or when the
//! dependencies form a cycle; no partial order is ever returned.
//!
//! The order is layered (see [`DependencyGraph::layers`]): packages without
//! dependencies come first, and packages within a layer are sorted by name,
//! so repeated runs over the same release compile in the same order.

pub mod dependency_graph;

use std::collections::{BTreeSet, HashMap};

use crate::core::ReleaseError;
use crate::release::Package;

pub use dependency_graph::DependencyGraph;

/// Packages grouped by compilation layer.
///
/// Every package's dependencies sit in earlier layers, so the packages of one
/// layer can be compiled independently of each other.
#[derive(Debug, Clone)]
pub struct OrderedPackages<'a> {
    layers: Vec<Vec<&'a Package>>,
    graph_deps: HashMap<String, BTreeSet<String>>,
}

impl<'a> OrderedPackages<'a> {
    /// Compilation layers, dependencies first.
    pub fn layers(&self) -> &[Vec<&'a Package>] {
        &self.layers
    }

    /// All packages in compilation order.
    pub fn packages(&self) -> Vec<&'a Package> {
        self.layers.iter().flatten().copied().collect()
    }

    /// Every package `name` depends on, directly or indirectly.
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        self.graph_deps.get(name).cloned().unwrap_or_default()
    }

    /// Number of packages.
    pub fn len(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Whether there are no packages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Orders release packages for compilation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyAnalysis;

impl DependencyAnalysis {
    /// Create a new analyzer.
    pub fn new() -> Self {
        Self
    }

    /// Build the dependency graph, checking that every dependency resolves.
    ///
    /// Packages and their dependencies are checked in name order, so the
    /// reported unresolved dependency is stable.
    pub fn graph(&self, packages: &[Package]) -> Result<DependencyGraph, ReleaseError> {
        let mut by_name: HashMap<&str, &Package> = HashMap::with_capacity(packages.len());
        for package in packages {
            if by_name.insert(package.name.as_str(), package).is_some() {
                return Err(ReleaseError::ValidationFailed {
                    rule: "unique-package".to_string(),
                    detail: format!("package '{}' is declared more than once", package.name),
                });
            }
        }

        let mut sorted: Vec<&Package> = packages.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut graph = DependencyGraph::new();
        for package in sorted {
            graph.add_package(&package.name);
            let mut deps: Vec<&String> = package.dependencies.iter().collect();
            deps.sort();
            for dependency in deps {
                if !by_name.contains_key(dependency.as_str()) {
                    return Err(ReleaseError::UnresolvedDependency {
                        package: package.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                graph.add_dependency(&package.name, dependency);
            }
        }

        Ok(graph)
    }

    /// Analyze `packages` into compilation layers.
    pub fn analyze<'a>(
        &self,
        packages: &'a [Package],
    ) -> Result<OrderedPackages<'a>, ReleaseError> {
        let graph = self.graph(packages)?;
        let by_name: HashMap<&str, &'a Package> =
            packages.iter().map(|p| (p.name.as_str(), p)).collect();

        let mut layers = Vec::new();
        for layer in graph.layers()? {
            let mut resolved = Vec::with_capacity(layer.len());
            for name in layer {
                if let Some(package) = by_name.get(name.as_str()) {
                    resolved.push(*package);
                }
            }
            layers.push(resolved);
        }

        let graph_deps = packages
            .iter()
            .map(|p| (p.name.clone(), graph.get_transitive_deps(&p.name)))
            .collect();

        tracing::debug!(
            packages = packages.len(),
            layers = layers.len(),
            "Ordered release packages"
        );

        Ok(OrderedPackages {
            layers,
            graph_deps,
        })
    }

    /// Packages in compilation order: every package after all of its
    /// transitive dependencies, ties broken by name.
    pub fn order<'a>(&self, packages: &'a [Package]) -> Result<Vec<&'a Package>, ReleaseError> {
        Ok(self.analyze(packages)?.packages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn package(name: &str, deps: &[&str]) -> Package {
        Package {
            name: name.to_string(),
            version: "1".to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            source_path: PathBuf::from("/src").join(name),
            source_checksum: format!("sha256:{name}"),
        }
    }

    fn names(order: &[&Package]) -> Vec<String> {
        order.iter().map(|p| p.name.clone()).collect()
    }

    #[test]
    fn test_order_places_dependencies_first() {
        let packages = vec![
            package("app", &["ruby", "libyaml"]),
            package("ruby", &["libyaml", "openssl"]),
            package("openssl", &[]),
            package("libyaml", &[]),
        ];

        let order = DependencyAnalysis::new().order(&packages).unwrap();
        assert_eq!(names(&order), vec!["libyaml", "openssl", "ruby", "app"]);
    }

    #[test]
    fn test_every_package_exactly_once() {
        let packages = vec![
            package("d", &["b", "c"]),
            package("c", &["a"]),
            package("b", &["a"]),
            package("a", &[]),
            package("e", &[]),
        ];

        let order = DependencyAnalysis::new().order(&packages).unwrap();
        assert_eq!(order.len(), packages.len());
        for (index, pkg) in order.iter().enumerate() {
            for dep in &pkg.dependencies {
                let dep_index = order.iter().position(|p| &p.name == dep).unwrap();
                assert!(dep_index < index, "{dep} must precede {}", pkg.name);
            }
        }
    }

    #[test]
    fn test_declaration_order_does_not_change_result() {
        let forward = vec![package("a", &[]), package("b", &["a"]), package("c", &[])];
        let backward = vec![package("c", &[]), package("b", &["a"]), package("a", &[])];

        let analysis = DependencyAnalysis::new();
        assert_eq!(
            names(&analysis.order(&forward).unwrap()),
            names(&analysis.order(&backward).unwrap())
        );
    }

    #[test]
    fn test_unresolved_dependency() {
        let packages = vec![package("app", &["ruby", "missing"]), package("ruby", &[])];

        let err = DependencyAnalysis::new().order(&packages).unwrap_err();
        match err {
            ReleaseError::UnresolvedDependency {
                package,
                dependency,
            } => {
                assert_eq!(package, "app");
                assert_eq!(dependency, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_two_package_cycle_names_a_package() {
        let packages = vec![package("a", &["b"]), package("b", &["a"])];

        let err = DependencyAnalysis::new().order(&packages).unwrap_err();
        assert!(matches!(err, ReleaseError::CircularDependency { .. }));
        let message = err.to_string();
        assert!(message.contains('a') || message.contains('b'));
        assert!(message.contains("a → b → a"));
    }

    #[test]
    fn test_self_dependency() {
        let packages = vec![package("a", &["a"])];
        let err = DependencyAnalysis::new().order(&packages).unwrap_err();
        assert!(matches!(err, ReleaseError::CircularDependency { chain } if chain == "a → a"));
    }

    #[test]
    fn test_duplicate_package_names() {
        let packages = vec![package("a", &[]), package("a", &[])];
        let err = DependencyAnalysis::new().order(&packages).unwrap_err();
        assert!(matches!(err, ReleaseError::ValidationFailed { .. }));
    }

    #[test]
    fn test_layers_and_transitive_dependencies() {
        let packages = vec![
            package("app", &["ruby"]),
            package("ruby", &["libc"]),
            package("libc", &[]),
            package("jq", &[]),
        ];

        let ordered = DependencyAnalysis::new().analyze(&packages).unwrap();
        let layers: Vec<Vec<String>> = ordered.layers().iter().map(|l| names(l)).collect();
        assert_eq!(layers, vec![vec!["jq", "libc"], vec!["ruby"], vec!["app"]]);
        assert_eq!(
            ordered.transitive_dependencies("app").into_iter().collect::<Vec<_>>(),
            vec!["libc", "ruby"]
        );
        assert_eq!(ordered.len(), 4);
    }

    #[test]
    fn test_empty_release() {
        let ordered = DependencyAnalysis::new().analyze(&[]).unwrap();
        assert!(ordered.is_empty());
    }
}
