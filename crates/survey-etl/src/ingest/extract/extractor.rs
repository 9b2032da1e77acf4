//! Portal extractor
//!
//! Runs the login state machine against a [`PortalBrowser`] and then downloads
//! the dataset file. Every browser call is bounded by the step timeout. The
//! download is bounded by the browser's own download timeout, with a looser
//! backstop here. The CAPTCHA prompt is the only unbounded wait.
//!
//! Diagnostic screenshots land in the dataset's working directory under the
//! names in [`artifacts`]. A failed screenshot is logged and otherwise ignored.

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::browser::{BrowserError, BrowserLauncher, PortalBrowser, SubmitOutcome};
use super::login::{LoginEvent, LoginMachine, LoginSession, LoginState};
use super::prompt::HumanInput;
use super::Extractor;
use crate::config::PortalConfig;
use crate::error::{ExtractionError, ExtractionReason};
use crate::ingest::registry::{DatasetDescriptor, FileType};
use crate::ingest::workspace::sanitize_name;

/// File names of the diagnostic artifacts
pub mod artifacts {
    pub const LOGIN_PAGE: &str = "1_login_page.png";
    pub const LOGIN_FORM: &str = "2_login_form.png";
    pub const CAPTCHA: &str = "captcha.png";
    pub const CAPTCHA_FILLED: &str = "captcha_filled.png";
    pub const DATASET_PAGE: &str = "3_dataset_page.png";
    pub const ERROR: &str = "error.png";
}

const CAPTCHA_PROMPT: &str = "Enter the CAPTCHA text";

pub struct PortalExtractor {
    config: PortalConfig,
    launcher: Arc<dyn BrowserLauncher>,
    prompt: Arc<dyn HumanInput>,
}

impl PortalExtractor {
    pub fn new(
        config: PortalConfig,
        launcher: Arc<dyn BrowserLauncher>,
        prompt: Arc<dyn HumanInput>,
    ) -> Self {
        Self {
            config,
            launcher,
            prompt,
        }
    }

    /// Drive the login state machine to a terminal state
    async fn authenticate(
        &self,
        browser: &mut dyn PortalBrowser,
        work_dir: &Path,
    ) -> Result<LoginSession, ExtractionError> {
        let mut machine =
            LoginMachine::new(self.config.max_login_attempts, &self.config.captcha_error_token);
        machine.apply(LoginEvent::Start)?;

        loop {
            let step = match machine.state() {
                LoginState::Init => Ok(LoginEvent::Start),
                LoginState::NavigatingLogin => self
                    .load_login_form(browser, work_dir)
                    .await
                    .map(|_| LoginEvent::FormDetected),
                LoginState::FormReady => self
                    .prepare_submission(browser, work_dir)
                    .await
                    .map(|_| LoginEvent::Submitted),
                LoginState::Submitting => {
                    self.step("login response", browser.submit_form())
                        .await
                        .map(|outcome| match outcome {
                            SubmitOutcome::Navigated => LoginEvent::Navigated,
                            SubmitOutcome::Rejected(message) => LoginEvent::Rejected(message),
                        })
                }
                LoginState::Authenticated => {
                    info!(
                        attempts = machine.session().attempt_count,
                        "✓ Logged in to portal"
                    );
                    return Ok(machine.session().clone());
                }
                LoginState::Failed(reason) => {
                    let reason = *reason;
                    return Err(machine.failure().unwrap_or_else(|| {
                        ExtractionError::new(reason, "login failed")
                    }));
                }
            };

            match step {
                Ok(event) => {
                    if let LoginEvent::Rejected(message) = &event {
                        warn!(
                            attempt = machine.session().attempt_count,
                            max_attempts = machine.session().max_attempts,
                            error = %message,
                            "Login attempt rejected"
                        );
                    }
                    let state = machine.apply(event)?;
                    debug!(state = ?state, "Login state changed");
                }
                Err(err) => {
                    machine.apply(LoginEvent::Aborted(err.reason))?;
                    return Err(err);
                }
            }
        }
    }

    async fn load_login_form(
        &self,
        browser: &mut dyn PortalBrowser,
        work_dir: &Path,
    ) -> Result<(), ExtractionError> {
        self.step("login page", browser.navigate(&self.config.login_url))
            .await?;
        self.snapshot(browser, &work_dir.join(artifacts::LOGIN_PAGE), false)
            .await;

        self.step("login form", browser.open_login_form()).await?;
        self.snapshot(browser, &work_dir.join(artifacts::LOGIN_FORM), false)
            .await;
        Ok(())
    }

    /// Fill credentials and, when the form asks for one, a CAPTCHA solution
    async fn prepare_submission(
        &self,
        browser: &mut dyn PortalBrowser,
        work_dir: &Path,
    ) -> Result<(), ExtractionError> {
        self.step(
            "credential entry",
            browser.fill_credentials(&self.config.credentials),
        )
        .await?;

        if !self.step("CAPTCHA detection", browser.detect_captcha()).await? {
            return Ok(());
        }

        let image = work_dir.join(artifacts::CAPTCHA);
        self.step("CAPTCHA capture", browser.capture_captcha(&image))
            .await?;
        info!(image = %image.display(), "CAPTCHA detected, requesting solution");

        let solution = self.prompt.request(CAPTCHA_PROMPT, &image).await?;

        self.step("CAPTCHA entry", browser.fill_captcha(&solution))
            .await?;
        self.snapshot(browser, &work_dir.join(artifacts::CAPTCHA_FILLED), false)
            .await;
        Ok(())
    }

    async fn download(
        &self,
        browser: &mut dyn PortalBrowser,
        dataset: &DatasetDescriptor,
        work_dir: &Path,
    ) -> Result<PathBuf, ExtractionError> {
        self.step("dataset page", browser.navigate(&dataset.url))
            .await?;
        self.snapshot(browser, &work_dir.join(artifacts::DATASET_PAGE), false)
            .await;

        let url = self
            .step("download control", browser.resolve_download_url(dataset))
            .await?;

        let dest = work_dir.join(download_file_name(dataset));
        let bytes = bounded(
            download_backstop(&self.config),
            "download",
            browser.download_to(&url, &dest),
        )
        .await?;

        info!(
            dataset = %dataset.name,
            file = %dest.display(),
            bytes = bytes,
            "✓ Extraction complete"
        );
        Ok(dest)
    }

    async fn run(
        &self,
        browser: &mut dyn PortalBrowser,
        dataset: &DatasetDescriptor,
        work_dir: &Path,
    ) -> Result<PathBuf, ExtractionError> {
        let session = self.authenticate(browser, work_dir).await?;
        debug!(attempts = session.attempt_count, "Login session complete");
        self.download(browser, dataset, work_dir).await
    }

    async fn step<T, F>(&self, what: &str, fut: F) -> Result<T, ExtractionError>
    where
        F: Future<Output = Result<T, BrowserError>>,
    {
        bounded(self.config.step_timeout(), what, fut).await
    }

    async fn snapshot(&self, browser: &mut dyn PortalBrowser, path: &Path, full_page: bool) {
        match self
            .step("screenshot", browser.screenshot(path, full_page))
            .await
        {
            Ok(()) => debug!(path = %path.display(), "Saved screenshot"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to save screenshot"),
        }
    }
}

#[async_trait]
impl Extractor for PortalExtractor {
    async fn extract(
        &self,
        dataset: &DatasetDescriptor,
        work_dir: &Path,
    ) -> Result<PathBuf, ExtractionError> {
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| ExtractionError::io("failed to create working directory", e))?;

        let mut browser = self.step("browser launch", self.launcher.launch()).await?;

        let result = self.run(browser.as_mut(), dataset, work_dir).await;

        if let Err(err) = &result {
            warn!(
                dataset = %dataset.name,
                reason = %err.reason,
                "Extraction failed, capturing diagnostic snapshot"
            );
            self.snapshot(browser.as_mut(), &work_dir.join(artifacts::ERROR), true)
                .await;
        }

        if let Err(e) = self.step("browser close", browser.close()).await {
            warn!(dataset = %dataset.name, error = %e, "Failed to close browser");
        }

        result
    }
}

/// Local file name for a dataset download
pub fn download_file_name(dataset: &DatasetDescriptor) -> String {
    let extension = match &dataset.file_type {
        FileType::Csv => "csv",
        FileType::Stata => "dta",
        FileType::Other(other) => other.as_str(),
    };
    format!("{}.{}", sanitize_name(&dataset.name), extension)
}

/// Outer limit on `download_to`
///
/// Browsers bound the transfer itself by the download timeout and clean up
/// partial files when it fires; this only catches a browser that never
/// returns, so it allows one extra step on top.
fn download_backstop(config: &PortalConfig) -> Duration {
    config.download_timeout() + config.step_timeout()
}

async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, ExtractionError>
where
    F: Future<Output = Result<T, BrowserError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(ExtractionError::from),
        Err(_) => Err(ExtractionError::new(
            ExtractionReason::Timeout,
            format!("{} did not finish within {}s", what, limit.as_secs()),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::registry::FieldSpec;

    #[test]
    fn test_download_file_name() {
        let mut dataset = DatasetDescriptor::new(
            "PLFS 2021/22",
            "https://example.org/plfs",
            FileType::Csv,
            vec![FieldSpec::number("year")],
        );
        assert_eq!(download_file_name(&dataset), "PLFS_2021_22.csv");

        dataset.file_type = FileType::Stata;
        assert_eq!(download_file_name(&dataset), "PLFS_2021_22.dta");
    }

    #[test]
    fn test_download_backstop_outlasts_download_timeout() {
        let config = PortalConfig {
            step_timeout_secs: 60,
            download_timeout_secs: 600,
            ..PortalConfig::default()
        };
        assert!(download_backstop(&config) > config.download_timeout());
        assert_eq!(download_backstop(&config), Duration::from_secs(660));
    }
}
