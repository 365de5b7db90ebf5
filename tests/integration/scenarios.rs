//! Whole-pipeline installs: the happy path, modeling errors caught before
//! any compilation, and failures in the middle of a run.

use anyhow::Result;
use serde_json::json;

use relstrap::core::{InstallStage, ReleaseError};
use relstrap::installer::INSTALLED_MARKER;
use relstrap::manifest::DeploymentManifest;
use relstrap::test_utils::{
    FakeCompilationEnvironment, JobFixture, PackageFixture, ReleaseFixture, TestWorkspace,
    manifest_yaml,
};

fn manifest(jobs: &[&str], properties: serde_json::Value) -> Result<DeploymentManifest> {
    Ok(DeploymentManifest::parse(&manifest_yaml("dev", jobs, properties))?)
}

/// Fresh workspace, two packages, one job: both packages compile, and a
/// second run compiles nothing.
#[tokio::test]
async fn test_fresh_install_then_warm_install() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let root = ReleaseFixture::new("director", "1")
        .package(PackageFixture::new("base", &[]))
        .package(PackageFixture::new("app", &["base"]))
        .job(
            JobFixture::new("web", &["app"])
                .template(
                    "ctl.tera",
                    "bin/ctl",
                    "#!/bin/sh\nexec app --port {{ p(name=\"port\") }}\n",
                )
                .property("port", None)
                .monit("check process web"),
        )
        .write(&ws.release_dir("director"))?;
    let manifest = manifest(&["web"], json!({ "port": 8080 }))?;

    let report = ws.installer()?.install(&root, &manifest).await?;
    assert_eq!(report.packages, 2);
    assert_eq!(report.packages_compiled, 2);
    assert_eq!(report.packages_cached, 0);
    assert_eq!(report.templates_rendered(), 1);
    assert_eq!(ws.environment.compiled(), vec!["base", "app"]);

    let job_dir = ws.workspace.jobs_dir().join("web");
    let ctl = std::fs::read_to_string(job_dir.join("bin/ctl"))?;
    assert!(ctl.contains("--port 8080"));
    assert!(job_dir.join("monit").exists());
    assert!(job_dir.join(INSTALLED_MARKER).exists());
    let built = std::fs::read_to_string(ws.workspace.packages_dir().join("app/app.built"))?;
    assert_eq!(built.trim(), "1.0 base");

    let report = ws.installer()?.install(&root, &manifest).await?;
    assert_eq!(report.packages_compiled, 0);
    assert_eq!(report.packages_cached, 2);
    assert_eq!(report.templates_cached(), 1);
    assert_eq!(ws.environment.calls(), 2);
    Ok(())
}

/// A dependency cycle is reported with both package names and nothing is
/// compiled.
#[tokio::test]
async fn test_cycle_is_rejected_before_compilation() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let root = ReleaseFixture::new("director", "1")
        .package(PackageFixture::new("a", &["b"]))
        .package(PackageFixture::new("b", &["a"]))
        .job(JobFixture::new("web", &["a"]))
        .write(&ws.release_dir("director"))?;

    let failure =
        ws.installer()?.install(&root, &manifest(&["web"], json!({}))?).await.unwrap_err();

    assert_eq!(failure.stage, InstallStage::DependenciesOrdered);
    match &failure.error {
        ReleaseError::CircularDependency {
            chain,
        } => {
            assert!(chain.contains('a'), "chain: {chain}");
            assert!(chain.contains('b'), "chain: {chain}");
        }
        other => panic!("expected a circular dependency, got {other:?}"),
    }
    assert_eq!(ws.environment.calls(), 0);
    assert!(ws.package_cache()?.list()?.is_empty());
    Ok(())
}

/// A template reading an unbound property fails validation: nothing is
/// compiled, no artifact is cached and the job is not installed.
#[tokio::test]
async fn test_missing_property_installs_nothing() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let root = ReleaseFixture::new("director", "1")
        .package(PackageFixture::new("pg", &[]))
        .job(
            JobFixture::new("web", &["pg"])
                .template("db.yml.tera", "config/db.yml", "port: {{ p(name=\"db.port\") }}\n")
                .property("db.port", None),
        )
        .write(&ws.release_dir("director"))?;

    let failure = ws
        .installer()?
        .install(&root, &manifest(&["web"], json!({ "db": { "host": "localhost" } }))?)
        .await
        .unwrap_err();

    assert_eq!(failure.stage, InstallStage::Validated);
    assert_eq!(failure.subject.as_deref(), Some("web"));
    match &failure.error {
        ReleaseError::MissingProperty {
            job,
            property,
            ..
        } => {
            assert_eq!(job, "web");
            assert_eq!(property, "db.port");
        }
        other => panic!("expected a missing property, got {other:?}"),
    }
    assert_eq!(ws.environment.calls(), 0);
    assert!(ws.package_cache()?.list()?.is_empty());
    assert!(ws.template_cache()?.list()?.is_empty());
    assert!(!ws.workspace.jobs_dir().join("web").join(INSTALLED_MARKER).exists());
    Ok(())
}

/// With three chained packages and the middle one failing, the first stays
/// cached and the third is never attempted; the next run resumes at the
/// failed package.
#[tokio::test]
async fn test_compilation_failure_keeps_earlier_artifacts() -> Result<()> {
    let ws = TestWorkspace::with_environment(FakeCompilationEnvironment::new().fail_on("b"))?;
    let root = ReleaseFixture::new("director", "1")
        .package(PackageFixture::new("a", &[]))
        .package(PackageFixture::new("b", &["a"]))
        .package(PackageFixture::new("c", &["b"]))
        .job(JobFixture::new("web", &["c"]))
        .write(&ws.release_dir("director"))?;
    let manifest = manifest(&["web"], json!({}))?;

    let failure = ws.installer()?.install(&root, &manifest).await.unwrap_err();
    assert_eq!(failure.stage, InstallStage::PackagesCompiled);
    assert_eq!(failure.subject.as_deref(), Some("b"));
    assert!(matches!(failure.error, ReleaseError::CompilationFailed { .. }));
    assert_eq!(ws.environment.compiled(), vec!["a", "b"]);
    assert_eq!(ws.package_cache()?.list()?.len(), 1);

    ws.environment.heal("b");
    let report = ws.installer()?.install(&root, &manifest).await?;
    assert_eq!(report.packages_cached, 1);
    assert_eq!(report.packages_compiled, 2);
    assert_eq!(ws.environment.compiled(), vec!["a", "b", "b", "c"]);
    Ok(())
}

/// Installing from a `.tgz` gives the same result as from a directory.
#[tokio::test]
async fn test_install_from_tarball() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let root = ReleaseFixture::new("director", "1")
        .package(PackageFixture::new("base", &[]))
        .job(JobFixture::new("web", &["base"]).template("motd.tera", "motd", "hello"))
        .write(&ws.release_dir("director"))?;
    let tarball = ws.temp.path().join("director-1.tgz");
    std::fs::write(&tarball, relstrap::archive::pack_dir(&root)?)?;

    let report = ws.installer()?.install(&tarball, &manifest(&["web"], json!({}))?).await?;
    assert_eq!(report.release, "director");
    assert_eq!(report.installed_jobs(), vec!["web"]);
    let motd = std::fs::read_to_string(ws.workspace.jobs_dir().join("web/motd"))?;
    assert_eq!(motd, "hello");
    Ok(())
}
