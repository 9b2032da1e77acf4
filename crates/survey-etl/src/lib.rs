//! Survey ETL Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls survey microdata from an authenticated government portal, coerces it
//! against a declared schema and upserts it into PostgreSQL.
//!
//! - **Configuration**: `EtlConfig` from environment variables and `.env`
//! - **Errors**: one error type per stage, wrapped in `StageError`
//! - **Ingestion**: registry, extractor, transformers, loader and orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use survey_etl::config::EtlConfig;
//! use survey_etl::ingest::extract::{ChromiumLauncher, PortalExtractor, TerminalPrompt};
//! use survey_etl::ingest::{DatasetRegistry, EtlOrchestrator, PgLoader, TransformerRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::load()?;
//!     let registry = DatasetRegistry::load(&config.pipeline.registry_path)?;
//!     let pool = PgLoader::connect(&config.database).await?;
//!
//!     let extractor = PortalExtractor::new(
//!         config.portal.clone(),
//!         Arc::new(ChromiumLauncher::new(config.portal.clone())),
//!         Arc::new(TerminalPrompt::new()),
//!     );
//!     let loader = PgLoader::new(pool, config.pipeline.batch_size);
//!     let orchestrator =
//!         EtlOrchestrator::new(extractor, loader, TransformerRegistry::with_defaults(), &config.pipeline);
//!
//!     let report = orchestrator.run(&registry).await;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod config;
pub mod error;
pub mod ingest;

pub use error::{ConfigError, ExtractionError, ExtractionReason, LoadError, Stage, StageError, TransformError};
