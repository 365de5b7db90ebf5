//! Fake collaborators for installer tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use crate::compiler::{CompilationEnvironment, CompileOutput, CompileRequest};
use crate::core::{BoxFuture, InstallStage};
use crate::events::{InstallReporter, StepOutcome};

/// Compilation environment that writes one marker file per package instead
/// of running a build.
///
/// The marker `<package>.built` holds the package version and the names of
/// the dependencies it received. Calls are counted and recorded in order.
#[derive(Debug, Default)]
pub struct FakeCompilationEnvironment {
    calls: AtomicUsize,
    compiled: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeCompilationEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every compilation of `package` fail.
    pub fn fail_on(self, package: &str) -> Self {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(package.to_string());
        }
        self
    }

    /// Stop failing `package`.
    pub fn heal(&self, package: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(package);
        }
    }

    /// Number of compile calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Packages passed to `compile`, in call order.
    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl CompilationEnvironment for FakeCompilationEnvironment {
    fn compile(&self, request: CompileRequest) -> BoxFuture<'_, CompileOutput> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut compiled) = self.compiled.lock() {
                compiled.push(request.package.clone());
            }

            let fails = self.failing.lock().map(|f| f.contains(&request.package)).unwrap_or(false);
            if fails {
                anyhow::bail!("packaging script exited with exit status: 2:\nmake: *** [all] Error 2");
            }

            let scratch = TempDir::new()?;
            let dependencies: Vec<&str> =
                request.dependencies.iter().map(|d| d.name.as_str()).collect();
            std::fs::write(
                scratch.path().join(format!("{}.built", request.package)),
                format!("{} {}\n", request.version, dependencies.join(",")),
            )?;
            Ok(CompileOutput::new(scratch.path().to_path_buf(), Some(scratch)))
        })
    }
}

/// One event seen by a [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReporterEvent {
    StageStarted(InstallStage, usize),
    StepStarted(InstallStage, String),
    StepFinished(InstallStage, String, StepOutcome),
    StageFinished(InstallStage, bool),
}

/// Reporter that records every event.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReporterEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReporterEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Subjects of finished steps of `stage` with `outcome`, in order.
    pub fn finished(&self, stage: InstallStage, outcome: StepOutcome) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ReporterEvent::StepFinished(s, subject, o) if s == stage && o == outcome => {
                    Some(subject)
                }
                _ => None,
            })
            .collect()
    }

    /// Stages that finished, with their result.
    pub fn stages(&self) -> Vec<(InstallStage, bool)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ReporterEvent::StageFinished(stage, success) => Some((stage, success)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ReporterEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl InstallReporter for RecordingReporter {
    fn stage_started(&self, stage: InstallStage, total: usize) {
        self.push(ReporterEvent::StageStarted(stage, total));
    }

    fn step_started(&self, stage: InstallStage, subject: &str) {
        self.push(ReporterEvent::StepStarted(stage, subject.to_string()));
    }

    fn step_finished(&self, stage: InstallStage, subject: &str, outcome: StepOutcome) {
        self.push(ReporterEvent::StepFinished(stage, subject.to_string(), outcome));
    }

    fn stage_finished(&self, stage: InstallStage, success: bool) {
        self.push(ReporterEvent::StageFinished(stage, success));
    }
}
