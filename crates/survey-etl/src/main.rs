//! Survey ETL - portal-to-PostgreSQL ingestion tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use survey_common::logging::{init_logging, LogConfig, LogLevel};
use survey_etl::config::EtlConfig;
use survey_etl::ingest::{DatasetRegistry, PgLoader, TransformerRegistry};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "survey-etl")]
#[command(author, version, about = "Survey dataset ETL pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Dataset registry file (overrides ETL_REGISTRY_PATH)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Root for per-run temporary files (overrides ETL_TEMP_ROOT)
    #[arg(long, global = true)]
    temp_root: Option<PathBuf>,

    /// Only process the named dataset (repeatable)
    #[arg(long = "only", value_name = "NAME", global = true)]
    only: Vec<String>,

    /// Run the browser without a window
    #[arg(long, global = true)]
    headless: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Extract, transform and load every registered dataset (default)
    Run,
    /// Load and validate the dataset registry, then exit
    Validate,
    /// Show what the store currently holds
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the CLI flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("survey-etl")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = EtlConfig::load()?;
    if let Some(registry) = &cli.registry {
        config.pipeline.registry_path = registry.clone();
    }
    if let Some(temp_root) = &cli.temp_root {
        config.pipeline.temp_root = temp_root.clone();
    }
    if cli.headless {
        config.portal.headless = true;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, &cli.only).await,
        Command::Validate => validate(&config, &cli.only),
        Command::Status => status(&config).await,
    }
}

fn load_registry(config: &EtlConfig, only: &[String]) -> Result<DatasetRegistry> {
    let registry = DatasetRegistry::load(&config.pipeline.registry_path)
        .context("Dataset registry is invalid; no datasets were processed")?;
    Ok(registry.filter_names(only)?)
}

#[cfg(feature = "browser")]
async fn run(config: EtlConfig, only: &[String]) -> Result<ExitCode> {
    use std::sync::Arc;
    use survey_etl::ingest::extract::{ChromiumLauncher, PortalExtractor, TerminalPrompt};
    use survey_etl::ingest::EtlOrchestrator;

    let registry = load_registry(&config, only)?;

    let pool = PgLoader::connect(&config.database).await?;
    let loader = PgLoader::new(pool, config.pipeline.batch_size);
    match loader.schema_version().await {
        Ok(Some(version)) => info!(schema_version = %version, "Connected to store"),
        Ok(None) => warn!("Store has no recorded schema version"),
        Err(e) => warn!(error = %e, "Could not read schema version"),
    }

    let extractor = PortalExtractor::new(
        config.portal.clone(),
        Arc::new(ChromiumLauncher::new(config.portal.clone())),
        Arc::new(TerminalPrompt::new()),
    );
    let orchestrator = EtlOrchestrator::new(
        extractor,
        loader,
        TransformerRegistry::with_defaults(),
        &config.pipeline,
    );

    let report = orchestrator.run(&registry).await;
    println!("{}", report.summary());

    Ok(ExitCode::from(report.exit_code() as u8))
}

#[cfg(not(feature = "browser"))]
async fn run(_config: EtlConfig, _only: &[String]) -> Result<ExitCode> {
    anyhow::bail!("survey-etl was built without the `browser` feature; portal extraction is unavailable")
}

fn validate(config: &EtlConfig, only: &[String]) -> Result<ExitCode> {
    let registry = load_registry(config, only)?;
    let transformers = TransformerRegistry::with_defaults();

    println!(
        "Registry {} is valid ({} datasets)",
        config.pipeline.registry_path.display(),
        registry.len()
    );
    for dataset in registry.iter() {
        let note = if transformers.supports(&dataset.file_type) {
            ""
        } else {
            " [will be skipped: unsupported type]"
        };
        println!(
            "  {:<20} {:<6} {} fields, survey_id={}{}",
            dataset.name,
            dataset.file_type.as_str(),
            dataset.schema.len(),
            dataset.survey_id(),
            note
        );
    }

    Ok(ExitCode::SUCCESS)
}

async fn status(config: &EtlConfig) -> Result<ExitCode> {
    let pool = PgLoader::connect(&config.database).await?;
    let loader = PgLoader::new(pool, config.pipeline.batch_size);

    let version = loader.schema_version().await?;
    println!("Schema version: {}", version.as_deref().unwrap_or("(none)"));

    let summaries = loader.summaries().await?;
    if summaries.is_empty() {
        println!("No datasets stored yet");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:<20} {:>8} {:>6} {:>6}  last updated",
        "survey", "records", "from", "to"
    );
    for s in summaries {
        println!(
            "{:<20} {:>8} {:>6} {:>6}  {}",
            s.survey_id,
            s.records,
            s.first_year,
            s.last_year,
            s.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    Ok(ExitCode::SUCCESS)
}
