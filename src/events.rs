//! Progress reporting for installer runs.
//!
//! The orchestrator reports stage and step transitions through an
//! [`InstallReporter`]. The CLI picks [`ProgressReporter`] for interactive
//! terminals and [`TracingReporter`] otherwise; tests record events.

use std::sync::Mutex;

use crate::core::InstallStage;
use crate::utils::progress::ProgressBar;

/// How a single compile, render or install step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The work was performed.
    Done,
    /// A cached artifact was reused; no work was performed.
    Cached,
    /// The step failed.
    Failed,
}

impl StepOutcome {
    /// Lowercase label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Cached => "cached",
            Self::Failed => "failed",
        }
    }
}

/// Receives installer progress.
///
/// Steps of one stage may be reported from concurrent tasks.
pub trait InstallReporter: Send + Sync {
    /// A stage with `total` steps started.
    fn stage_started(&self, stage: InstallStage, total: usize);

    /// Work on `subject` (a package or job name) started.
    fn step_started(&self, stage: InstallStage, subject: &str);

    /// Work on `subject` ended.
    fn step_finished(&self, stage: InstallStage, subject: &str, outcome: StepOutcome);

    /// A stage ended, successfully or not.
    fn stage_finished(&self, stage: InstallStage, success: bool);
}

/// Reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl InstallReporter for TracingReporter {
    fn stage_started(&self, stage: InstallStage, total: usize) {
        tracing::info!(steps = total, "Started {stage}");
    }

    fn step_started(&self, stage: InstallStage, subject: &str) {
        tracing::debug!(%subject, "{stage}: started");
    }

    fn step_finished(&self, stage: InstallStage, subject: &str, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Failed => tracing::warn!(%subject, "{stage}: failed"),
            _ => tracing::info!(%subject, outcome = outcome.as_str(), "{stage}: finished"),
        }
    }

    fn stage_finished(&self, stage: InstallStage, success: bool) {
        if success {
            tracing::info!("Finished {stage}");
        } else {
            tracing::warn!("Aborted {stage}");
        }
    }
}

/// Drives one `indicatif` bar per stage.
pub struct ProgressReporter {
    visible: bool,
    current: Mutex<Option<ProgressBar>>,
}

impl ProgressReporter {
    /// Create a reporter; bars are hidden when `visible` is false or the
    /// `RELSTRAP_NO_PROGRESS` environment variable is set.
    pub fn new(visible: bool) -> Self {
        Self {
            visible: visible && !crate::utils::progress::is_progress_disabled(),
            current: Mutex::new(None),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.current.lock()
            && let Some(bar) = guard.as_ref()
        {
            f(bar);
        }
    }
}

impl InstallReporter for ProgressReporter {
    fn stage_started(&self, stage: InstallStage, total: usize) {
        let bar = ProgressBar::with_visibility(total as u64, self.visible);
        bar.set_prefix(stage.description());
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(bar);
        }
    }

    fn step_started(&self, _stage: InstallStage, subject: &str) {
        self.with_bar(|bar| bar.set_message(subject.to_string()));
    }

    fn step_finished(&self, _stage: InstallStage, subject: &str, outcome: StepOutcome) {
        self.with_bar(|bar| {
            bar.set_message(format!("{subject} ({})", outcome.as_str()));
            if outcome != StepOutcome::Failed {
                bar.inc(1);
            }
        });
    }

    fn stage_finished(&self, stage: InstallStage, success: bool) {
        let bar = self.current.lock().ok().and_then(|mut guard| guard.take());
        if let Some(bar) = bar {
            if success {
                bar.finish_with_message(format!("{stage} done"));
            } else {
                bar.finish_with_message(format!("{stage} failed"));
            }
        }
    }
}
