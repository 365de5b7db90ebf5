//! Progress bars for long-running install stages.
//!
//! Wraps `indicatif` with the relstrap styling. Bars are hidden when the
//! `RELSTRAP_NO_PROGRESS` environment variable is set.

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};

/// Environment variable that disables all progress bars.
pub const NO_PROGRESS_ENV: &str = "RELSTRAP_NO_PROGRESS";

/// Whether progress bars are disabled through the environment.
pub fn is_progress_disabled() -> bool {
    std::env::var(NO_PROGRESS_ENV).is_ok()
}

fn default_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| IndicatifStyle::default_bar())
        .progress_chars("━╸━")
}

/// A progress bar with consistent styling.
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// Create a bar for `len` steps, hidden when progress is disabled.
    pub fn new(len: u64) -> Self {
        Self::with_visibility(len, !is_progress_disabled())
    }

    /// Create a bar for `len` steps, visible only if `visible` is set.
    pub fn with_visibility(len: u64, visible: bool) -> Self {
        let inner = if visible {
            let bar = IndicatifBar::new(len);
            bar.set_style(default_style());
            bar
        } else {
            IndicatifBar::hidden()
        };
        Self {
            inner,
        }
    }

    /// Set the label shown before the bar.
    pub fn set_prefix(&self, prefix: impl Into<String>) {
        self.inner.set_prefix(prefix.into());
    }

    /// Set the message shown after the bar.
    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    /// Advance by `delta` steps.
    pub fn inc(&self, delta: u64) {
        self.inner.inc(delta);
    }

    /// Current position.
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// Finish, leaving `msg` on screen.
    pub fn finish_with_message(&self, msg: impl Into<String>) {
        self.inner.finish_with_message(msg.into());
    }

    /// Finish and remove the bar.
    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}
