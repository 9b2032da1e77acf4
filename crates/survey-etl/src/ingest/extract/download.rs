//! Streaming file download
//!
//! The portal serves dataset files behind the browser's login session, so the
//! request carries the session cookies copied out of the browser. The body is
//! streamed to a `.part` file and renamed once complete, so a partial file is
//! never mistaken for a finished download.

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{COOKIE, USER_AGENT};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::browser::BrowserError;

/// Session-bound HTTP downloader
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    user_agent: String,
    timeout: Duration,
}

impl Downloader {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, BrowserError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BrowserError::DownloadFailed {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            timeout,
        })
    }

    /// Download `url` to `dest`, bounded by the configured timeout
    pub async fn download(
        &self,
        url: &str,
        cookie_header: Option<&str>,
        dest: &Path,
    ) -> Result<u64, BrowserError> {
        match tokio::time::timeout(self.timeout, self.stream_to_file(url, cookie_header, dest))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                let _ = tokio::fs::remove_file(part_path(dest)).await;
                Err(BrowserError::Timeout {
                    what: format!("download of {}", url),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }

    async fn stream_to_file(
        &self,
        url: &str,
        cookie_header: Option<&str>,
        dest: &Path,
    ) -> Result<u64, BrowserError> {
        let mut request = self.client.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(cookies) = cookie_header {
            request = request.header(COOKIE, cookies);
        }

        let response = request.send().await.map_err(|e| BrowserError::DownloadFailed {
            message: format!("request to {} failed: {}", url, e),
        })?;

        if !response.status().is_success() {
            return Err(BrowserError::DownloadFailed {
                message: format!("{} returned HTTP {}", url, response.status()),
            });
        }

        let total_size = response.content_length().unwrap_or(0);
        let pb = ProgressBar::new(total_size);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!("Downloading {}", file_label(dest)));

        let part = part_path(dest);
        let mut file = tokio::fs::File::create(&part).await?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BrowserError::DownloadFailed {
                message: format!("stream from {} interrupted: {}", url, e),
            })?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part, dest).await?;

        pb.finish_and_clear();
        debug!(url = %url, "Download stream closed");
        info!(
            file = %dest.display(),
            bytes = downloaded,
            "✓ Downloaded dataset file"
        );

        Ok(downloaded)
    }
}

/// Render `name=value` pairs as a single `Cookie` header value
pub fn cookie_header<'a, I>(cookies: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let joined = cookies
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ");
    (!joined.is_empty()).then_some(joined)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn file_label(dest: &Path) -> String {
    dest.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dest.display().to_string())
}
