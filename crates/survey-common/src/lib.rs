//! Survey ETL Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities used by the survey ETL workspace members.
//!
//! - **Error Handling**: `CommonError` and its `Result` alias
//! - **Checksums**: digests of downloaded source files
//! - **Logging**: `tracing` subscriber setup driven by `LogConfig`
//!
//! # Example
//!
//! ```no_run
//! use survey_common::checksum::compute_file_checksum;
//!
//! fn fingerprint(path: &str) -> survey_common::Result<String> {
//!     compute_file_checksum(path)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
