//! Run-scoped temporary artifacts
//!
//! Each run gets its own root directory; each dataset gets one subdirectory
//! under it holding the downloaded file and diagnostic screenshots. A failed
//! dataset's directory is removed, a successful one is kept for inspection.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RunWorkspace {
    root: PathBuf,
}

impl RunWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace under `base` named after the run's start time
    pub fn for_run(base: &Path, started_at: DateTime<Utc>) -> Self {
        Self::new(base.join(format!("run-{}", started_at.format("%Y%m%dT%H%M%S%.3fZ"))))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.root.join(sanitize_name(dataset))
    }

    pub async fn create_dataset_dir(&self, dataset: &str) -> std::io::Result<PathBuf> {
        let dir = self.dataset_dir(dataset);
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dataset = %dataset, dir = %dir.display(), "Created dataset directory");
        Ok(dir)
    }

    /// Remove a dataset's directory; failures are logged, never returned
    pub async fn discard(&self, dataset: &str) {
        let dir = self.dataset_dir(dataset);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(dataset = %dataset, dir = %dir.display(), "Removed dataset directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                dataset = %dataset,
                dir = %dir.display(),
                error = %e,
                "Failed to clean up dataset directory"
            ),
        }
    }
}

/// Map a dataset name onto a single safe path component
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "dataset".to_string()
    } else {
        cleaned.to_string()
    }
}
