//! Core types shared by every stage of the installer.
//!
//! - [`error`] - the [`ReleaseError`] taxonomy, [`InstallFailure`] and CLI error reporting
//! - [`stage`] - the [`InstallStage`] state machine labels
//! - [`cancel`] - the [`CancelFlag`] used to stop starting new steps

pub mod cancel;
pub mod error;
pub mod stage;

pub use cancel::CancelFlag;
pub use error::{ErrorContext, InstallFailure, ReleaseError, user_friendly_error};
pub use stage::InstallStage;

use std::future::Future;
use std::pin::Pin;

/// Future returned by the collaborator traits (blobstore, compilation
/// environment, artifact installer).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;
