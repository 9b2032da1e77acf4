//! Error taxonomy for the ETL pipeline
//!
//! Each stage has its own error type. The orchestrator wraps them in
//! [`StageError`] so a failure can always be attributed to one dataset and one
//! stage. Only [`ConfigError`] is fatal to a whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage a dataset failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Why an extraction ended in the `Failed` state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionReason {
    /// A navigation, selector wait or download exceeded its bound
    Timeout,
    /// Every allowed login attempt was answered with a CAPTCHA error
    LoginExhausted,
    /// The portal answered with a non-CAPTCHA login error
    LoginRejected,
    /// An expected page element never appeared
    SelectorMissing,
    /// Transport failure talking to the portal
    Network,
    /// The browser could not be launched or stopped responding
    Browser,
    /// Local filesystem failure while writing artifacts
    Io,
}

impl ExtractionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionReason::Timeout => "timeout",
            ExtractionReason::LoginExhausted => "login-exhausted",
            ExtractionReason::LoginRejected => "login-rejected",
            ExtractionReason::SelectorMissing => "selector-missing",
            ExtractionReason::Network => "network",
            ExtractionReason::Browser => "browser",
            ExtractionReason::Io => "io",
        }
    }
}

impl std::fmt::Display for ExtractionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("extraction failed ({reason}): {detail}")]
pub struct ExtractionError {
    pub reason: ExtractionReason,
    pub detail: String,
}

impl ExtractionError {
    pub fn new(reason: ExtractionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ExtractionReason::Timeout, detail)
    }

    pub fn io(context: &str, err: std::io::Error) -> Self {
        Self::new(ExtractionReason::Io, format!("{}: {}", context, err))
    }
}

// ============================================================================
// Transform
// ============================================================================

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("missing required field '{field}' at row {row}")]
    MissingRequired { field: String, row: usize },

    #[error("required field '{field}' at row {row} has unusable value '{value}'")]
    InvalidRequired {
        field: String,
        row: usize,
        value: String,
    },

    #[error("row {row} has no integral '{field}' to key the record on")]
    MissingNaturalKey { field: String, row: usize },

    #[error("source file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("source file is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("malformed source at row {row}: {message}")]
    Malformed { row: usize, message: String },

    #[error("IO error reading source: {0}")]
    Io(#[from] std::io::Error),

    #[error("transform aborted: {0}")]
    Aborted(String),
}

impl TransformError {
    /// The schema field responsible for the failure, when there is one
    pub fn field(&self) -> Option<&str> {
        match self {
            TransformError::MissingRequired { field, .. }
            | TransformError::InvalidRequired { field, .. }
            | TransformError::MissingNaturalKey { field, .. } => Some(field),
            _ => None,
        }
    }
}

// ============================================================================
// Load
// ============================================================================

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("store connection failed: {0}")]
    Connection(String),
}

impl From<sqlx::Error> for LoadError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => LoadError::Constraint(db_err.to_string()),
            other => LoadError::Connection(other.to_string()),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read dataset registry {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse dataset registry: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid dataset '{dataset}': {message}")]
    Invalid { dataset: String, message: String },

    #[error("invalid value for {var}: {message}")]
    Env { var: String, message: String },
}

impl ConfigError {
    pub fn invalid(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            dataset: dataset.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Stage wrapper
// ============================================================================

/// A dataset-scoped failure from any stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Extract(#[from] ExtractionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Extract(_) => Stage::Extract,
            StageError::Transform(_) => Stage::Transform,
            StageError::Load(_) => Stage::Load,
        }
    }
}
