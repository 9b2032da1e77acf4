//! Authenticated extract stage
//!
//! Logs in to the survey portal (solving CAPTCHAs with operator help when the
//! form asks for one), opens the dataset page and downloads the data file into
//! the dataset's working directory.

pub mod browser;
#[cfg(feature = "browser")]
pub mod chromium;
pub mod download;
pub mod extractor;
pub mod login;
pub mod prompt;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::ExtractionError;
use crate::ingest::registry::DatasetDescriptor;

pub use browser::{BrowserError, BrowserLauncher, PortalBrowser, SubmitOutcome};
#[cfg(feature = "browser")]
pub use chromium::{ChromiumBrowser, ChromiumLauncher};
pub use download::Downloader;
pub use extractor::{artifacts, PortalExtractor};
pub use login::{LoginEvent, LoginMachine, LoginSession, LoginState};
pub use prompt::{HumanInput, TerminalPrompt};

/// Fetches a dataset's source file
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Download the dataset into `work_dir`, returning the local file path
    async fn extract(
        &self,
        dataset: &DatasetDescriptor,
        work_dir: &Path,
    ) -> Result<PathBuf, ExtractionError>;
}
