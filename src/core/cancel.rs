//! Operator interrupt propagation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::ReleaseError;

/// Shared interrupt flag checked before every compile, render and install step.
///
/// Setting the flag never aborts work that is already running; it only keeps
/// new steps from starting. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`ReleaseError::Interrupted`] if cancellation was requested.
    pub fn check(&self, step: &str) -> Result<(), ReleaseError> {
        if self.is_cancelled() {
            tracing::warn!("Interrupt requested, not starting {step}");
            return Err(ReleaseError::Interrupted {
                step: step.to_string(),
            });
        }
        Ok(())
    }
}
