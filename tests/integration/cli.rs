//! Command line behavior of the `relstrap` binary.

use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use relstrap::test_utils::{JobFixture, PackageFixture, ReleaseFixture, manifest_yaml};

struct CliProject {
    temp: TempDir,
}

impl CliProject {
    fn new() -> Result<Self> {
        Ok(Self {
            temp: TempDir::new()?,
        })
    }

    fn path(&self) -> &Path {
        self.temp.path()
    }

    fn workspace(&self) -> PathBuf {
        self.path().join("workspace")
    }

    fn write_release(&self, fixture: &ReleaseFixture) -> Result<PathBuf> {
        fixture.write(&self.path().join("release"))
    }

    fn write_manifest(&self, jobs: &[&str], properties: serde_json::Value) -> Result<PathBuf> {
        let path = self.path().join("deployment.yml");
        std::fs::write(&path, manifest_yaml("dev", jobs, properties))?;
        Ok(path)
    }

    /// A command isolated from the user's configuration file.
    fn relstrap(&self) -> Result<Command> {
        let mut cmd = Command::cargo_bin("relstrap")?;
        cmd.current_dir(self.path())
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1")
            .arg("--config")
            .arg(self.path().join("config.toml"))
            .arg("--no-progress");
        Ok(cmd)
    }
}

fn release() -> ReleaseFixture {
    ReleaseFixture::new("director", "1")
        .package(PackageFixture::new("base", &[]))
        .package(
            PackageFixture::new("app", &["base"]).packaging(
                "cp \"$BOSH_PACKAGES_DIR/base/base.built\" \"$BOSH_INSTALL_TARGET/app.built\"\n",
            ),
        )
        .job(
            JobFixture::new("web", &["app"])
                .template("ctl.tera", "bin/ctl", "port={{ p(name=\"port\", default=80) }}\n")
                .property("port", None),
        )
}

#[test]
fn test_help_lists_commands() -> Result<()> {
    Command::cargo_bin("relstrap")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("cache"));
    Ok(())
}

#[test]
fn test_validate_prints_package_order() -> Result<()> {
    let project = CliProject::new()?;
    let release = project.write_release(&release())?;
    let manifest = project.write_manifest(&["web"], json!({}))?;

    project
        .relstrap()?
        .arg("validate")
        .arg(&release)
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("director/1 is valid"))
        .stdout(predicate::str::contains("base → app"));
    Ok(())
}

#[test]
fn test_validate_unknown_job_fails() -> Result<()> {
    let project = CliProject::new()?;
    let release = project.write_release(&release())?;
    let manifest = project.write_manifest(&["nats"], json!({}))?;

    project
        .relstrap()?
        .arg("validate")
        .arg(&release)
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("nats"));
    Ok(())
}

#[test]
fn test_install_then_list_cache() -> Result<()> {
    let project = CliProject::new()?;
    let release = project.write_release(&release())?;
    let manifest = project.write_manifest(&["web"], json!({ "port": 9000 }))?;

    project
        .relstrap()?
        .arg("install")
        .arg(&release)
        .arg("--manifest")
        .arg(&manifest)
        .arg("--workspace")
        .arg(project.workspace())
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed release"))
        .stdout(predicate::str::contains("2 compiled, 0 cached"));

    let ctl = std::fs::read_to_string(project.workspace().join("jobs/web/bin/ctl"))?;
    assert_eq!(ctl.trim(), "port=9000");
    assert!(project.workspace().join("packages/app/app.built").exists());

    project
        .relstrap()?
        .args(["cache", "list", "--workspace"])
        .arg(project.workspace())
        .assert()
        .success()
        .stdout(predicate::str::contains("packages (2 entries)"))
        .stdout(predicate::str::contains("templates (1 entries)"));
    Ok(())
}

#[test]
fn test_failed_packaging_script_exits_nonzero() -> Result<()> {
    let project = CliProject::new()?;
    let fixture = ReleaseFixture::new("director", "1")
        .package(PackageFixture::new("base", &[]).packaging("echo 'cc: fatal error' >&2\nexit 3\n"))
        .job(JobFixture::new("web", &["base"]));
    let release = project.write_release(&fixture)?;
    let manifest = project.write_manifest(&["web"], json!({}))?;

    project
        .relstrap()?
        .arg("install")
        .arg(&release)
        .arg("--manifest")
        .arg(&manifest)
        .arg("--workspace")
        .arg(project.workspace())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("compiling packages failed for 'base'"));
    Ok(())
}
