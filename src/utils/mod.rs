//! Filesystem and terminal helpers shared across the installer.
//!
//! - [`fs`] - atomic writes, directory creation and replacement
//! - [`progress`] - `indicatif` progress bars honoring `RELSTRAP_NO_PROGRESS`

pub mod fs;
pub mod progress;

pub use fs::{atomic_write, copy_dir, ensure_dir, remove_dir_if_exists, replace_dir};
pub use progress::{ProgressBar, is_progress_disabled};
