//! Integration test suite for relstrap
//!
//! End-to-end tests driving the installer over temporary workspaces. The
//! library tests use a fake compilation environment; the CLI tests run the
//! real binary with `bash` packaging scripts.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **scenarios**: installs that succeed, fail on modeling errors or fail midway
//! - **caching**: warm re-installs and artifact sharing between releases
//! - **cli**: command line behavior and exit codes

mod caching;
mod cli;
mod scenarios;
