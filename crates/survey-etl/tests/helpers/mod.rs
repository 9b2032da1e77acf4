//! Test doubles shared by the survey-etl integration tests
//!
//! - `ScriptedBrowser` / `ScriptedLauncher`: a portal browser whose responses
//!   are scripted up front and whose calls are recorded for assertions
//! - `FixedPrompt`: a CAPTCHA channel that always answers the same text
//! - `FakeExtractor` / `MemoryLoader`: stage doubles for orchestrator tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use survey_etl::config::{Credentials, PortalConfig};
use survey_etl::error::{ExtractionError, ExtractionReason, LoadError};
use survey_etl::ingest::extract::{
    BrowserError, BrowserLauncher, Extractor, HumanInput, PortalBrowser, SubmitOutcome,
};
use survey_etl::ingest::{DatasetDescriptor, FieldSpec, FileType, Loader, NormalizedRecord};

// ============================================================================
// Scripted browser
// ============================================================================

/// Everything a scripted browser did, shared with the test after the browser
/// itself has been dropped
#[derive(Debug, Default)]
pub struct BrowserLog {
    pub calls: Vec<String>,
    pub submissions: usize,
    pub captcha_solutions: Vec<String>,
    pub screenshots: Vec<PathBuf>,
    pub closed: bool,
}

#[derive(Debug, Clone)]
pub struct BrowserScript {
    /// Outcomes returned by successive submissions; `Navigated` once exhausted
    pub submit_outcomes: VecDeque<SubmitOutcome>,
    pub captcha: bool,
    pub download_body: Vec<u8>,
    /// Method name that never completes
    pub hang_on: Option<&'static str>,
    /// Selector reported missing by `open_login_form`
    pub missing_selector: Option<String>,
    pub screenshots_fail: bool,
}

impl Default for BrowserScript {
    fn default() -> Self {
        Self {
            submit_outcomes: VecDeque::new(),
            captcha: false,
            download_body: b"year,state\n2021,Goa\n".to_vec(),
            hang_on: None,
            missing_selector: None,
            screenshots_fail: false,
        }
    }
}

pub struct ScriptedBrowser {
    script: BrowserScript,
    log: Arc<Mutex<BrowserLog>>,
}

impl ScriptedBrowser {
    fn record(&self, call: &str) {
        if let Ok(mut log) = self.log.lock() {
            log.calls.push(call.to_string());
        }
    }

    async fn enter(&self, call: &'static str) {
        self.record(call);
        if self.script.hang_on == Some(call) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl PortalBrowser for ScriptedBrowser {
    async fn navigate(&mut self, _url: &str) -> Result<(), BrowserError> {
        self.enter("navigate").await;
        Ok(())
    }

    async fn open_login_form(&mut self) -> Result<(), BrowserError> {
        self.enter("open_login_form").await;
        match &self.script.missing_selector {
            Some(selector) => Err(BrowserError::ElementNotFound {
                selector: selector.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn fill_credentials(&mut self, _credentials: &Credentials) -> Result<(), BrowserError> {
        self.enter("fill_credentials").await;
        Ok(())
    }

    async fn detect_captcha(&mut self) -> Result<bool, BrowserError> {
        self.enter("detect_captcha").await;
        Ok(self.script.captcha)
    }

    async fn capture_captcha(&mut self, path: &Path) -> Result<(), BrowserError> {
        self.enter("capture_captcha").await;
        tokio::fs::write(path, b"captcha-png").await?;
        Ok(())
    }

    async fn fill_captcha(&mut self, solution: &str) -> Result<(), BrowserError> {
        self.enter("fill_captcha").await;
        self.log.lock().unwrap().captcha_solutions.push(solution.to_string());
        Ok(())
    }

    async fn submit_form(&mut self) -> Result<SubmitOutcome, BrowserError> {
        self.enter("submit_form").await;
        self.log.lock().unwrap().submissions += 1;
        Ok(self
            .script
            .submit_outcomes
            .pop_front()
            .unwrap_or(SubmitOutcome::Navigated))
    }

    async fn resolve_download_url(
        &mut self,
        dataset: &DatasetDescriptor,
    ) -> Result<String, BrowserError> {
        self.enter("resolve_download_url").await;
        Ok(format!("{}/download", dataset.url))
    }

    async fn download_to(&mut self, _url: &str, dest: &Path) -> Result<u64, BrowserError> {
        self.enter("download_to").await;
        tokio::fs::write(dest, &self.script.download_body).await?;
        Ok(self.script.download_body.len() as u64)
    }

    async fn screenshot(&mut self, path: &Path, _full_page: bool) -> Result<(), BrowserError> {
        self.enter("screenshot").await;
        if self.script.screenshots_fail {
            return Err(BrowserError::ScreenshotFailed {
                message: "renderer crashed".to_string(),
            });
        }
        tokio::fs::write(path, b"png").await?;
        self.log.lock().unwrap().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.record("close");
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out scripted browsers that all write to one shared log
#[derive(Clone)]
pub struct ScriptedLauncher {
    script: BrowserScript,
    pub log: Arc<Mutex<BrowserLog>>,
    pub launches: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new(script: BrowserScript) -> Self {
        Self {
            script,
            log: Arc::new(Mutex::new(BrowserLog::default())),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn submissions(&self) -> usize {
        self.log.lock().unwrap().submissions
    }

    pub fn closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Box<dyn PortalBrowser>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedBrowser {
            script: self.script.clone(),
            log: self.log.clone(),
        }))
    }
}

// ============================================================================
// Human input
// ============================================================================

#[derive(Clone)]
pub struct FixedPrompt {
    answer: String,
    pub requests: Arc<AtomicUsize>,
}

impl FixedPrompt {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HumanInput for FixedPrompt {
    async fn request(&self, _message: &str, image: &Path) -> Result<String, ExtractionError> {
        assert!(image.exists(), "CAPTCHA image must be captured before prompting");
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

// ============================================================================
// Configuration and fixtures
// ============================================================================

pub fn portal_config() -> PortalConfig {
    PortalConfig {
        login_url: "https://portal.test/nada43/index.php".to_string(),
        credentials: Credentials {
            username: "analyst@example.org".to_string(),
            password: "secret".to_string(),
        },
        step_timeout_secs: 5,
        download_timeout_secs: 30,
        ..PortalConfig::default()
    }
}

pub fn csv_dataset(name: &str) -> DatasetDescriptor {
    DatasetDescriptor::new(
        name,
        &format!("https://portal.test/catalog/{}", name),
        FileType::Csv,
        vec![
            FieldSpec::number("year").required(),
            FieldSpec::string("state"),
        ],
    )
}

// ============================================================================
// Stage doubles
// ============================================================================

/// Extractor that writes canned CSV content, or fails for chosen datasets
#[derive(Clone, Default)]
pub struct FakeExtractor {
    sources: Arc<HashMap<String, Result<String, ExtractionReason>>>,
    pub visited: Arc<Mutex<Vec<String>>>,
}

impl FakeExtractor {
    pub fn new(sources: Vec<(&str, Result<&str, ExtractionReason>)>) -> Self {
        Self {
            sources: Arc::new(
                sources
                    .into_iter()
                    .map(|(name, src)| (name.to_string(), src.map(str::to_string)))
                    .collect(),
            ),
            visited: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        dataset: &DatasetDescriptor,
        work_dir: &Path,
    ) -> Result<PathBuf, ExtractionError> {
        self.visited.lock().unwrap().push(dataset.name.clone());

        match self.sources.get(&dataset.name) {
            Some(Ok(content)) => {
                let path = work_dir.join(format!("{}.csv", dataset.name));
                tokio::fs::write(&path, content)
                    .await
                    .map_err(|e| ExtractionError::io("write", e))?;
                Ok(path)
            }
            Some(Err(reason)) => {
                // leave an artifact behind so cleanup can be observed
                let _ = tokio::fs::write(work_dir.join("error.png"), b"png").await;
                Err(ExtractionError::new(*reason, "scripted failure"))
            }
            None => Err(ExtractionError::new(
                ExtractionReason::Network,
                format!("no source scripted for {}", dataset.name),
            )),
        }
    }
}

/// In-memory store with the same upsert semantics as the PostgreSQL loader
#[derive(Clone, Default)]
pub struct MemoryLoader {
    pub rows: Arc<Mutex<BTreeMap<(String, i32), NormalizedRecord>>>,
    pub loads: Arc<Mutex<Vec<(String, usize)>>>,
    fail_for: Option<String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(dataset: &str) -> Self {
        Self {
            fail_for: Some(dataset.to_string()),
            ..Self::default()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn loaded_datasets(&self) -> Vec<String> {
        self.loads.lock().unwrap().iter().map(|(d, _)| d.clone()).collect()
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    async fn load(&self, dataset: &str, records: &[NormalizedRecord]) -> Result<usize, LoadError> {
        if self.fail_for.as_deref() == Some(dataset) {
            return Err(LoadError::Connection("pool timed out".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        for record in records {
            rows.insert((record.survey_id.clone(), record.year), record.clone());
        }
        self.loads
            .lock()
            .unwrap()
            .push((dataset.to_string(), records.len()));
        Ok(records.len())
    }
}
