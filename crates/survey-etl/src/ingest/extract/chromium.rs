//! Chromium-backed portal browser
//!
//! Drives a real Chrome/Chromium over the DevTools Protocol with
//! `chromiumoxide`. Element waits are polling loops bounded by the step
//! timeout. File downloads leave the browser: the session cookies are copied
//! into an HTTP request and the body is streamed to disk.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::browser::{BrowserError, BrowserLauncher, PortalBrowser, SubmitOutcome};
use super::download::{cookie_header, Downloader};
use crate::config::{Credentials, PortalConfig, PortalSelectors};
use crate::ingest::registry::DatasetDescriptor;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const WINDOW_WIDTH: u32 = 1366;
const WINDOW_HEIGHT: u32 = 900;

static PROFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Launches one Chromium instance per dataset
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: PortalConfig,
}

impl ChromiumLauncher {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn PortalBrowser>, BrowserError> {
        let browser = ChromiumBrowser::launch(&self.config).await?;
        Ok(Box::new(browser))
    }
}

pub struct ChromiumBrowser {
    browser: Browser,
    page: Page,
    handler: tokio::task::JoinHandle<()>,
    selectors: PortalSelectors,
    step_timeout: Duration,
    downloader: Downloader,
}

impl ChromiumBrowser {
    pub async fn launch(config: &PortalConfig) -> Result<Self, BrowserError> {
        let chrome_path = find_chrome_binary(config.chrome_path.as_deref())?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(WINDOW_WIDTH, WINDOW_HEIGHT);

        if config.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let user_data_dir = std::env::temp_dir().join(format!(
            "survey-etl-chrome-{}-{}",
            std::process::id(),
            PROFILE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        builder = builder
            .user_data_dir(user_data_dir)
            .arg(format!("--user-agent={}", config.user_agent))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-dev-shm-usage");

        let browser_config = builder.build().map_err(|e| BrowserError::Session {
            message: format!("failed to build browser config: {}", e),
        })?;

        let (browser, mut handler) =
            Browser::launch(browser_config)
                .await
                .map_err(|e| BrowserError::Session {
                    message: format!("failed to launch Chrome: {}", e),
                })?;

        let handler = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Session {
                message: format!("failed to create page: {}", e),
            })?;

        info!(headless = config.headless, "Launched Chromium");

        Ok(Self {
            browser,
            page,
            handler,
            selectors: config.selectors.clone(),
            step_timeout: config.step_timeout(),
            downloader: Downloader::new(&config.user_agent, config.download_timeout())?,
        })
    }

    async fn wait_for(&self, selector: &str) -> Result<Element, BrowserError> {
        wait_for_selector(&self.page, selector, self.step_timeout).await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        let element = self.wait_for(selector).await?;
        let clear_js = format!(
            "document.querySelector('{}').value = ''",
            selector.replace('\'', "\\'")
        );
        bounded(self.step_timeout, "clearing input", async {
            self.page.evaluate(clear_js).await.map_err(cdp_error)
        })
        .await?;

        bounded(self.step_timeout, "typing into input", async {
            element.click().await.map_err(cdp_error)?;
            element.type_str(value).await.map_err(cdp_error)?;
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .page
            .url()
            .await
            .map_err(cdp_error)?
            .unwrap_or_else(|| "about:blank".to_string()))
    }
}

#[async_trait]
impl PortalBrowser for ChromiumBrowser {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!(url = %url, "Navigating");
        bounded(self.step_timeout, "navigation", async {
            self.page
                .goto(url)
                .await
                .map_err(|e| BrowserError::NavigationFailed {
                    message: format!("{}: {}", url, e),
                })?;
            Ok(())
        })
        .await
    }

    async fn open_login_form(&mut self) -> Result<(), BrowserError> {
        if self.page.find_element(&self.selectors.login_form).await.is_ok() {
            return Ok(());
        }

        let link = self.wait_for(&self.selectors.login_link).await?;
        bounded(self.step_timeout, "login link", async {
            link.click().await.map_err(cdp_error)?;
            Ok(())
        })
        .await?;

        self.wait_for(&self.selectors.login_form).await?;
        Ok(())
    }

    async fn fill_credentials(&mut self, credentials: &Credentials) -> Result<(), BrowserError> {
        self.fill(&self.selectors.username_input, &credentials.username).await?;
        self.fill(&self.selectors.password_input, &credentials.password).await
    }

    async fn detect_captcha(&mut self) -> Result<bool, BrowserError> {
        Ok(self.page.find_element(&self.selectors.captcha_input).await.is_ok())
    }

    async fn capture_captcha(&mut self, path: &Path) -> Result<(), BrowserError> {
        let image = self.wait_for(&self.selectors.captcha_image).await?;
        let bytes = bounded(self.step_timeout, "CAPTCHA capture", async {
            image
                .screenshot(CaptureScreenshotFormat::Png)
                .await
                .map_err(|e| BrowserError::ScreenshotFailed {
                    message: e.to_string(),
                })
        })
        .await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn fill_captcha(&mut self, solution: &str) -> Result<(), BrowserError> {
        self.fill(&self.selectors.captcha_input, solution).await
    }

    async fn submit_form(&mut self) -> Result<SubmitOutcome, BrowserError> {
        let before = self.current_url().await?;
        let button = self.wait_for(&self.selectors.submit_button).await?;
        bounded(self.step_timeout, "form submission", async {
            button.click().await.map_err(cdp_error)?;
            Ok(())
        })
        .await?;

        let started = Instant::now();
        loop {
            if let Ok(alert) = self.page.find_element(&self.selectors.error_alert).await {
                let text = alert.inner_text().await.map_err(cdp_error)?.unwrap_or_default();
                let text = text.trim();
                if !text.is_empty() {
                    return Ok(SubmitOutcome::Rejected(text.to_string()));
                }
            }

            let current = self.current_url().await?;
            if current != before && self.page.find_element(&self.selectors.login_form).await.is_err() {
                return Ok(SubmitOutcome::Navigated);
            }

            if started.elapsed() >= self.step_timeout {
                return Err(BrowserError::Timeout {
                    what: "login response".to_string(),
                    timeout_secs: self.step_timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn resolve_download_url(
        &mut self,
        dataset: &DatasetDescriptor,
    ) -> Result<String, BrowserError> {
        let control = self.wait_for(&self.selectors.download_control).await?;
        let href = control.attribute("href").await.map_err(cdp_error)?;
        let onclick = control.attribute("onclick").await.map_err(cdp_error)?;

        let raw = href
            .filter(|h| !h.trim().is_empty() && !h.starts_with('#') && !h.starts_with("javascript:"))
            .or_else(|| onclick.as_deref().and_then(url_in_script))
            .unwrap_or_else(|| dataset.url.clone());

        let base = self.current_url().await?;
        let resolved = url::Url::parse(&base)
            .and_then(|b| b.join(&raw))
            .map(|u| u.to_string())
            .unwrap_or(raw);

        debug!(dataset = %dataset.name, url = %resolved, "Resolved download target");
        Ok(resolved)
    }

    async fn download_to(&mut self, url: &str, dest: &Path) -> Result<u64, BrowserError> {
        let cookies = self.page.get_cookies().await.map_err(cdp_error)?;
        let header = cookie_header(cookies.iter().map(|c| (c.name.as_str(), c.value.as_str())));
        self.downloader.download(url, header.as_deref(), dest).await
    }

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> Result<(), BrowserError> {
        let bytes = bounded(self.step_timeout, "screenshot", async {
            self.page
                .screenshot(ScreenshotParams::builder().full_page(full_page).build())
                .await
                .map_err(|e| BrowserError::ScreenshotFailed {
                    message: e.to_string(),
                })
        })
        .await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let result = self.browser.close().await;
        self.handler.abort();
        result.map_err(|e| BrowserError::Session {
            message: format!("failed to close browser: {}", e),
        })?;
        Ok(())
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Run `fut`, mapping an elapsed `limit` to [`BrowserError::Timeout`]
async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, BrowserError>
where
    F: Future<Output = Result<T, BrowserError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| BrowserError::Timeout {
            what: what.to_string(),
            timeout_secs: limit.as_secs(),
        })?
}

async fn wait_for_selector(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, BrowserError> {
    let started = Instant::now();
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if started.elapsed() >= timeout {
            return Err(BrowserError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn cdp_error(err: chromiumoxide::error::CdpError) -> BrowserError {
    BrowserError::Cdp {
        message: err.to_string(),
    }
}

/// First quoted URL-looking literal in an inline handler such as
/// `onclick="window.location='/download/42'"`
fn url_in_script(script: &str) -> Option<String> {
    script
        .split(['\'', '"'])
        .skip(1)
        .step_by(2)
        .find(|s| s.starts_with("http") || s.starts_with('/'))
        .map(str::to_string)
}

/// Find a Chrome or Chromium binary, preferring the configured path
fn find_chrome_binary(configured: Option<&Path>) -> Result<PathBuf, BrowserError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    #[cfg(target_os = "macos")]
    let candidates: &[&str] = &[
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    #[cfg(target_os = "windows")]
    let candidates: &[&str] = &[
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ];

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let candidates: &[&str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ];

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| BrowserError::Session {
            message: "no Chrome/Chromium binary found; set PORTAL_CHROME_PATH".to_string(),
        })
}
