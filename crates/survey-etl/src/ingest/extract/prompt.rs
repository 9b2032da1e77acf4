//! Human-input channel for CAPTCHA solutions
//!
//! Solving a CAPTCHA needs an operator. A request blocks the pipeline until an
//! answer arrives and carries no timeout.

use async_trait::async_trait;
use dialoguer::Input;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ExtractionError, ExtractionReason};

/// A line-based prompt/response channel
#[async_trait]
pub trait HumanInput: Send + Sync {
    /// Ask for free text, returning the answer verbatim
    ///
    /// `image` points at the captured challenge so the operator can look at it.
    async fn request(&self, message: &str, image: &Path) -> Result<String, ExtractionError>;
}

/// Prompts on the controlling terminal
#[derive(Debug, Default, Clone)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HumanInput for TerminalPrompt {
    async fn request(&self, message: &str, image: &Path) -> Result<String, ExtractionError> {
        info!(image = %image.display(), "Waiting for operator to solve CAPTCHA");

        let prompt = format!("{} (image saved to {})", message, image.display());
        let image: PathBuf = image.to_path_buf();

        tokio::task::spawn_blocking(move || {
            Input::<String>::new()
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()
        })
        .await
        .map_err(|e| ExtractionError::new(ExtractionReason::Io, format!("prompt task failed: {}", e)))?
        .map_err(|e| {
            ExtractionError::new(
                ExtractionReason::Io,
                format!("failed to read CAPTCHA solution for {}: {}", image.display(), e),
            )
        })
    }
}
