//! Browser capability used by the extractor
//!
//! [`PortalBrowser`] is the narrow set of page interactions the login and
//! download sequence needs. The production implementation drives Chromium;
//! tests substitute a scripted double.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::config::Credentials;
use crate::error::{ExtractionError, ExtractionReason};
use crate::ingest::registry::DatasetDescriptor;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("navigation failed: {message}")]
    NavigationFailed { message: String },

    #[error("timed out after {timeout_secs}s waiting for {what}")]
    Timeout { what: String, timeout_secs: u64 },

    #[error("download failed: {message}")]
    DownloadFailed { message: String },

    #[error("screenshot failed: {message}")]
    ScreenshotFailed { message: String },

    #[error("browser session error: {message}")]
    Session { message: String },

    #[error("CDP error: {message}")]
    Cdp { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BrowserError> for ExtractionError {
    fn from(err: BrowserError) -> Self {
        let reason = match &err {
            BrowserError::ElementNotFound { .. } => ExtractionReason::SelectorMissing,
            BrowserError::Timeout { .. } => ExtractionReason::Timeout,
            BrowserError::NavigationFailed { .. } | BrowserError::DownloadFailed { .. } => {
                ExtractionReason::Network
            }
            BrowserError::Io(_) => ExtractionReason::Io,
            BrowserError::ScreenshotFailed { .. }
            | BrowserError::Session { .. }
            | BrowserError::Cdp { .. } => ExtractionReason::Browser,
        };
        ExtractionError::new(reason, err.to_string())
    }
}

/// What the portal did after the login form was submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The page navigated away from the login form
    Navigated,
    /// An error alert appeared; carries its text
    Rejected(String),
}

/// Page interactions needed to authenticate and download one dataset
///
/// One instance serves exactly one dataset and is closed afterwards. Session
/// cookies persist across login attempts on the same instance.
#[async_trait]
pub trait PortalBrowser: Send {
    /// Load a URL and wait for the page to settle
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Follow the login link and wait for the login form
    async fn open_login_form(&mut self) -> Result<(), BrowserError>;

    async fn fill_credentials(&mut self, credentials: &Credentials) -> Result<(), BrowserError>;

    /// Whether the current form shows a CAPTCHA input
    async fn detect_captcha(&mut self) -> Result<bool, BrowserError>;

    /// Save the CAPTCHA image as PNG
    async fn capture_captcha(&mut self, path: &Path) -> Result<(), BrowserError>;

    async fn fill_captcha(&mut self, solution: &str) -> Result<(), BrowserError>;

    /// Submit the login form and race navigation against an error alert
    async fn submit_form(&mut self) -> Result<SubmitOutcome, BrowserError>;

    /// Locate the dataset's download control on the current page
    async fn resolve_download_url(
        &mut self,
        dataset: &DatasetDescriptor,
    ) -> Result<String, BrowserError>;

    /// Stream the resource to `dest` using the authenticated session
    ///
    /// Returns the number of bytes written. Implementations bound the transfer
    /// by the download timeout and leave no partial file behind when it fires.
    async fn download_to(&mut self, url: &str, dest: &Path) -> Result<u64, BrowserError>;

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> Result<(), BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Creates a fresh browser for each dataset
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PortalBrowser>, BrowserError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_error_reasons() {
        let cases = [
            (
                BrowserError::ElementNotFound {
                    selector: "#login-form".into(),
                },
                ExtractionReason::SelectorMissing,
            ),
            (
                BrowserError::Timeout {
                    what: "navigation".into(),
                    timeout_secs: 60,
                },
                ExtractionReason::Timeout,
            ),
            (
                BrowserError::DownloadFailed {
                    message: "HTTP 503".into(),
                },
                ExtractionReason::Network,
            ),
            (
                BrowserError::Session {
                    message: "launch".into(),
                },
                ExtractionReason::Browser,
            ),
        ];

        for (err, reason) in cases {
            assert_eq!(ExtractionError::from(err).reason, reason);
        }
    }
}
