//! Cache reuse across runs and across releases.

use anyhow::Result;
use serde_json::json;

use relstrap::manifest::DeploymentManifest;
use relstrap::test_utils::{
    JobFixture, PackageFixture, ReleaseFixture, TestWorkspace, manifest_yaml,
};

fn web_release(version: &str, template: &str) -> ReleaseFixture {
    ReleaseFixture::new("director", version)
        .package(PackageFixture::new("base", &[]))
        .package(PackageFixture::new("app", &["base"]))
        .job(
            JobFixture::new("web", &["app"])
                .template("app.conf.tera", "config/app.conf", template)
                .property("workers", Some(json!(2))),
        )
}

fn manifest(properties: serde_json::Value) -> Result<DeploymentManifest> {
    Ok(DeploymentManifest::parse(&manifest_yaml("dev", &["web"], properties))?)
}

#[tokio::test]
async fn test_next_release_reuses_unchanged_artifacts() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let template = "workers = {{ p(name=\"workers\") }}\n";
    let v1 = web_release("1", template).write(&ws.release_dir("director-1"))?;
    let v2 = web_release("2", template).write(&ws.release_dir("director-2"))?;
    let manifest = manifest(json!({}))?;

    ws.installer()?.install(&v1, &manifest).await?;
    let report = ws.installer()?.install(&v2, &manifest).await?;

    assert_eq!(report.version, "2");
    assert_eq!(report.packages_cached, 2);
    assert_eq!(report.templates_cached(), 1);
    assert_eq!(ws.environment.calls(), 2);
    assert_eq!(ws.template_cache()?.list()?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_changed_package_recompiles_dependents_only() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let template = "workers = {{ p(name=\"workers\") }}\n";
    let v1 = ReleaseFixture::new("director", "1")
        .package(PackageFixture::new("base", &[]))
        .package(PackageFixture::new("tools", &[]))
        .package(PackageFixture::new("app", &["base"]))
        .job(JobFixture::new("web", &["app", "tools"]).template("a.tera", "a", template))
        .write(&ws.release_dir("director-1"))?;
    let v2 = ReleaseFixture::new("director", "2")
        .package(PackageFixture::new("base", &[]).file("src/patch.diff", "fix"))
        .package(PackageFixture::new("tools", &[]))
        .package(PackageFixture::new("app", &["base"]))
        .job(JobFixture::new("web", &["app", "tools"]).template("a.tera", "a", template))
        .write(&ws.release_dir("director-2"))?;
    let manifest =
        DeploymentManifest::parse(&manifest_yaml("dev", &["web"], json!({ "workers": 4 })))?;

    ws.installer()?.install(&v1, &manifest).await?;
    let first = ws.environment.compiled().len();
    let report = ws.installer()?.install(&v2, &manifest).await?;

    let recompiled: Vec<String> = ws.environment.compiled().split_off(first);
    assert_eq!(recompiled, vec!["base", "app"]);
    assert_eq!(report.packages_cached, 1);
    // New package fingerprints change the template fingerprint too
    assert_eq!(report.templates_rendered(), 1);
    Ok(())
}

#[tokio::test]
async fn test_property_change_rerenders_without_recompiling() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let root = web_release("1", "workers = {{ p(name=\"workers\") }}\n")
        .write(&ws.release_dir("director"))?;

    let first = ws.installer()?.install(&root, &manifest(json!({}))?).await?;
    let second = ws.installer()?.install(&root, &manifest(json!({ "workers": 8 }))?).await?;

    assert_eq!(second.packages_cached, 2);
    assert_eq!(second.templates_rendered(), 1);
    assert_ne!(first.jobs[0].fingerprint, second.jobs[0].fingerprint);
    let conf = std::fs::read_to_string(ws.workspace.jobs_dir().join("web/config/app.conf"))?;
    assert_eq!(conf.trim(), "workers = 8");
    assert_eq!(ws.template_cache()?.list()?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_caches_survive_new_installer_instances() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let root = web_release("1", "static\n").write(&ws.release_dir("director"))?;
    let manifest = manifest(json!({}))?;

    ws.installer()?.install(&root, &manifest).await?;
    let entries = ws.package_cache()?.list()?;
    assert_eq!(entries.len(), 2);
    for (_, entry) in &entries {
        assert!(ws.workspace.blobs_dir().join(&entry.blob.id).exists());
    }
    Ok(())
}
