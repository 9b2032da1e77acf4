//! Configuration management
//!
//! Values come from the process environment (after loading `.env` if present)
//! with the defaults below. CLI flags may override a few of them afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ingest::storage::MAX_BATCH_SIZE;

// ============================================================================
// Defaults
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/survey_data";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default portal entry page (the NADA catalog hosts the login link).
pub const DEFAULT_PORTAL_LOGIN_URL: &str = "https://microdata.gov.in/nada43/index.php";

/// Default number of login submissions per dataset.
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 3;

/// Default bound for a single navigation / selector wait, in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 60;

/// Default bound for a file download, in seconds.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Default browser user agent.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Default dataset registry location.
pub const DEFAULT_REGISTRY_PATH: &str = "config/datasets.yaml";

/// Default rows per upsert statement.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default value recorded as `metadata.source`.
pub const DEFAULT_SOURCE_NAME: &str = "MoSPI";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub database: DatabaseConfig,
    pub portal: PortalConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Portal login credentials
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// CSS selectors for the portal's login and dataset pages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSelectors {
    pub login_link: String,
    pub login_form: String,
    pub username_input: String,
    pub password_input: String,
    pub captcha_input: String,
    pub captcha_image: String,
    pub submit_button: String,
    pub error_alert: String,
    pub download_control: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            login_link: "a[href*='auth/login']".to_string(),
            login_form: "#login-form".to_string(),
            username_input: "#email".to_string(),
            password_input: "#password".to_string(),
            captcha_input: "#captcha".to_string(),
            captcha_image: "#captcha-image".to_string(),
            submit_button: "#login-form button[type='submit']".to_string(),
            error_alert: ".alert-danger".to_string(),
            download_control: "a.download, button.download, a[href*='download']".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub login_url: String,
    pub credentials: Credentials,
    pub selectors: PortalSelectors,
    pub max_login_attempts: u32,
    pub step_timeout_secs: u64,
    pub download_timeout_secs: u64,
    /// Case-insensitive token that marks a login error as CAPTCHA related
    pub captcha_error_token: String,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,
}

impl PortalConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: DEFAULT_PORTAL_LOGIN_URL.to_string(),
            credentials: Credentials::default(),
            selectors: PortalSelectors::default(),
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            captcha_error_token: "captcha".to_string(),
            headless: false,
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub registry_path: PathBuf,
    /// Root of the run-scoped temp tree; one subdirectory per dataset
    pub temp_root: PathBuf,
    pub batch_size: usize,
    pub source_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            temp_root: std::env::temp_dir().join("survey-etl"),
            batch_size: DEFAULT_BATCH_SIZE,
            source_name: DEFAULT_SOURCE_NAME.to_string(),
        }
    }
}

impl EtlConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let portal_defaults = PortalConfig::default();
        let pipeline_defaults = PipelineConfig::default();

        let config = EtlConfig {
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                )?,
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
            },
            portal: PortalConfig {
                login_url: env_or("PORTAL_LOGIN_URL", portal_defaults.login_url),
                credentials: Credentials {
                    username: env_or("PORTAL_USERNAME", String::new()),
                    password: env_or("PORTAL_PASSWORD", String::new()),
                },
                selectors: portal_defaults.selectors,
                max_login_attempts: env_parse(
                    "PORTAL_MAX_LOGIN_ATTEMPTS",
                    portal_defaults.max_login_attempts,
                )?,
                step_timeout_secs: env_parse(
                    "PORTAL_STEP_TIMEOUT_SECS",
                    portal_defaults.step_timeout_secs,
                )?,
                download_timeout_secs: env_parse(
                    "PORTAL_DOWNLOAD_TIMEOUT_SECS",
                    portal_defaults.download_timeout_secs,
                )?,
                captcha_error_token: portal_defaults.captcha_error_token,
                headless: env_parse("PORTAL_HEADLESS", portal_defaults.headless)?,
                chrome_path: std::env::var("PORTAL_CHROME_PATH").ok().map(PathBuf::from),
                user_agent: env_or("PORTAL_USER_AGENT", portal_defaults.user_agent),
            },
            pipeline: PipelineConfig {
                registry_path: std::env::var("ETL_REGISTRY_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(pipeline_defaults.registry_path),
                temp_root: std::env::var("ETL_TEMP_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(pipeline_defaults.temp_root),
                batch_size: env_parse("ETL_BATCH_SIZE", pipeline_defaults.batch_size)?,
                source_name: env_or("ETL_SOURCE_NAME", pipeline_defaults.source_name),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(env_error("DATABASE_URL", "cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(env_error("DATABASE_MAX_CONNECTIONS", "must be greater than 0"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(env_error(
                "DATABASE_MIN_CONNECTIONS",
                format!(
                    "({}) cannot be greater than max_connections ({})",
                    self.database.min_connections, self.database.max_connections
                ),
            ));
        }

        if self.portal.max_login_attempts == 0 {
            return Err(env_error("PORTAL_MAX_LOGIN_ATTEMPTS", "must be at least 1"));
        }

        if self.portal.step_timeout_secs == 0 || self.portal.download_timeout_secs == 0 {
            return Err(env_error("PORTAL_*_TIMEOUT_SECS", "timeouts must be greater than 0"));
        }

        if url::Url::parse(&self.portal.login_url).is_err() {
            return Err(env_error("PORTAL_LOGIN_URL", "is not a valid URL"));
        }

        if self.pipeline.batch_size == 0 {
            return Err(env_error("ETL_BATCH_SIZE", "must be greater than 0"));
        }

        if self.pipeline.batch_size > MAX_BATCH_SIZE {
            return Err(env_error(
                "ETL_BATCH_SIZE",
                format!("({}) cannot exceed {}", self.pipeline.batch_size, MAX_BATCH_SIZE),
            ));
        }

        if self.portal.credentials.username.is_empty() {
            tracing::warn!("PORTAL_USERNAME is not set - portal login will fail");
        }

        Ok(())
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            portal: PortalConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

fn env_or(var: &str, default: String) -> String {
    std::env::var(var).unwrap_or(default)
}

fn env_parse<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| env_error(var, e.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_error(var: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Env {
        var: var.to_string(),
        message: message.into(),
    }
}
