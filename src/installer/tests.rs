#[cfg(test)]
mod installer_tests {
    use crate::core::{CancelFlag, InstallStage, ReleaseError};
    use crate::events::StepOutcome;
    use crate::manifest::DeploymentManifest;
    use crate::test_utils::{
        FakeCompilationEnvironment, JobFixture, PackageFixture, RecordingReporter, ReleaseFixture,
        TestWorkspace, manifest_yaml,
    };
    use anyhow::Result;
    use serde_json::json;
    use std::sync::Arc;

    fn release() -> ReleaseFixture {
        ReleaseFixture::new("director", "1")
            .package(PackageFixture::new("base", &[]))
            .package(PackageFixture::new("app", &["base"]))
            .job(
                JobFixture::new("web", &["app"])
                    .template("ctl.tera", "bin/ctl", "exec app --port {{ p(name=\"port\") }}")
                    .property("port", Some(json!(8080))),
            )
    }

    fn manifest(jobs: &[&str]) -> DeploymentManifest {
        DeploymentManifest::parse(&manifest_yaml("dev", jobs, json!({}))).unwrap()
    }

    #[tokio::test]
    async fn test_stages_are_reported_in_order() -> Result<()> {
        let ws = TestWorkspace::new()?;
        let root = release().write(&ws.release_dir("director"))?;
        let reporter = Arc::new(RecordingReporter::new());
        let installer = ws.builder()?.reporter(reporter.clone()).build();

        installer.install(&root, &manifest(&["web"])).await?;

        let stages: Vec<InstallStage> = reporter.stages().into_iter().map(|(s, _)| s).collect();
        assert_eq!(stages, InstallStage::ALL.to_vec());
        assert!(reporter.stages().iter().all(|(_, ok)| *ok));
        assert_eq!(
            reporter.finished(InstallStage::PackagesCompiled, StepOutcome::Done),
            vec!["base", "app"]
        );
        assert_eq!(reporter.finished(InstallStage::Installed, StepOutcome::Done), vec!["web"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_job_fails_validation() -> Result<()> {
        let ws = TestWorkspace::new()?;
        let root = release().write(&ws.release_dir("director"))?;

        let failure =
            ws.installer()?.install(&root, &manifest(&["web", "nats"])).await.unwrap_err();
        assert_eq!(failure.stage, InstallStage::Validated);
        assert!(matches!(
            failure.error,
            ReleaseError::ValidationFailed { ref rule, .. } if rule == "required-job"
        ));
        assert_eq!(ws.environment.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolved_dependency_names_package() -> Result<()> {
        let ws = TestWorkspace::new()?;
        let root = ReleaseFixture::new("director", "1")
            .package(PackageFixture::new("app", &["ruby"]))
            .job(JobFixture::new("web", &[]))
            .write(&ws.release_dir("director"))?;

        let failure = ws.installer()?.install(&root, &manifest(&["web"])).await.unwrap_err();
        assert_eq!(failure.stage, InstallStage::DependenciesOrdered);
        assert_eq!(failure.subject.as_deref(), Some("app"));
        assert!(matches!(failure.error, ReleaseError::UnresolvedDependency { .. }));
        assert!(failure.error.is_modeling_error());
        assert_eq!(ws.environment.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() -> Result<()> {
        let ws = TestWorkspace::new()?;
        let root = release().write(&ws.release_dir("director"))?;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let installer = ws.builder()?.cancel(cancel).build();
        let failure = installer.install(&root, &manifest(&["web"])).await.unwrap_err();

        assert_eq!(failure.stage, InstallStage::Extracted);
        assert!(matches!(failure.error, ReleaseError::Interrupted { .. }));
        assert_eq!(ws.environment.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_compilation_keeps_release_uncompiled() -> Result<()> {
        let ws = TestWorkspace::new()?;
        let root = release().write(&ws.release_dir("director"))?;
        let release = crate::release::ReleaseReader::new(&root).read()?;

        let cancel = CancelFlag::new();
        let installer = ws.builder()?.cancel(cancel.clone()).build();
        cancel.cancel();
        let failure = installer.install_release(&release, &manifest(&["web"])).await.unwrap_err();

        assert_eq!(failure.stage, InstallStage::PackagesCompiled);
        assert_eq!(failure.subject.as_deref(), Some("base"));
        assert!(ws.package_cache()?.list()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_parallel_compilation_respects_layers() -> Result<()> {
        let ws = TestWorkspace::new()?;
        let root = ReleaseFixture::new("director", "1")
            .package(PackageFixture::new("zlib", &[]))
            .package(PackageFixture::new("openssl", &[]))
            .package(PackageFixture::new("ruby", &["openssl", "zlib"]))
            .job(JobFixture::new("web", &["ruby"]))
            .write(&ws.release_dir("director"))?;

        let installer = ws.builder()?.max_parallel(4).build();
        let report = installer.install(&root, &manifest(&["web"])).await?;

        assert_eq!(report.packages_compiled, 3);
        let compiled = ws.environment.compiled();
        assert_eq!(compiled.last().map(String::as_str), Some("ruby"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_report_names_stage_and_package() -> Result<()> {
        let ws = TestWorkspace::with_environment(FakeCompilationEnvironment::new().fail_on("app"))?;
        let root = release().write(&ws.release_dir("director"))?;

        let failure = ws.installer()?.install(&root, &manifest(&["web"])).await.unwrap_err();
        assert_eq!(failure.stage, InstallStage::PackagesCompiled);
        assert_eq!(failure.subject.as_deref(), Some("app"));
        assert!(failure.to_string().contains("compiling packages failed for 'app'"));
        assert!(failure.to_string().contains("Error 2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_package_name_with_separators_is_rejected() -> Result<()> {
        let ws = TestWorkspace::new()?;
        let root = release().write(&ws.release_dir("director"))?;
        let mut release = crate::release::ReleaseReader::new(&root).read()?;
        release.packages[0].name = "../escaped".to_string();

        let failure =
            ws.installer()?.install_release(&release, &manifest(&["web"])).await.unwrap_err();
        assert_eq!(failure.stage, InstallStage::Validated);
        assert!(matches!(
            failure.error,
            ReleaseError::ValidationFailed { ref rule, .. } if rule == "package-name"
        ));
        assert_eq!(ws.environment.calls(), 0);
        assert!(!ws.workspace.packages_dir().join("../escaped").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_property_stops_before_compilation() -> Result<()> {
        let ws = TestWorkspace::new()?;
        let root = release().write(&ws.release_dir("director"))?;
        let mut release = crate::release::ReleaseReader::new(&root).read()?;
        release.jobs[0].properties.clear();
        let reporter = Arc::new(RecordingReporter::new());
        let installer = ws.builder()?.reporter(reporter.clone()).build();

        let failure = installer.install_release(&release, &manifest(&["web"])).await.unwrap_err();
        assert_eq!(failure.stage, InstallStage::Validated);
        assert!(matches!(failure.error, ReleaseError::MissingProperty { .. }));
        assert_eq!(reporter.stages(), vec![(InstallStage::Validated, false)]);
        assert_eq!(ws.environment.calls(), 0);
        Ok(())
    }
}
