//! ETL orchestrator
//!
//! Runs Extract → Transform → Load for every dataset in registry order, one
//! dataset at a time. A failure in any stage is recorded against that dataset
//! and the loop moves on; it never aborts the run.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, warn, Instrument};

use super::extract::Extractor;
use super::metrics::{RunReport, SkipReason};
use super::registry::{DatasetDescriptor, DatasetRegistry};
use super::storage::Loader;
use super::transform::TransformerRegistry;
use super::workspace::RunWorkspace;
use crate::config::PipelineConfig;
use crate::error::{ExtractionError, StageError};

/// Sequential pipeline driver
pub struct EtlOrchestrator<E, L> {
    extractor: E,
    loader: L,
    transformers: TransformerRegistry,
    temp_root: PathBuf,
    source_name: String,
}

impl<E: Extractor, L: Loader> EtlOrchestrator<E, L> {
    pub fn new(
        extractor: E,
        loader: L,
        transformers: TransformerRegistry,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            extractor,
            loader,
            transformers,
            temp_root: config.temp_root.clone(),
            source_name: config.source_name.clone(),
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Process every dataset in the registry and report the outcome
    pub async fn run(&self, registry: &DatasetRegistry) -> RunReport {
        let started_at = Utc::now();
        let mut report = RunReport::new(started_at);
        let workspace = RunWorkspace::for_run(&self.temp_root, started_at);

        let (runnable, unsupported): (Vec<&DatasetDescriptor>, Vec<&DatasetDescriptor>) = registry
            .iter()
            .partition(|d| self.transformers.supports(&d.file_type));

        for dataset in &unsupported {
            info!(
                dataset = %dataset.name,
                file_type = %dataset.file_type,
                "Skipping dataset with unsupported file type"
            );
            report.record_skip(&dataset.name, SkipReason::UnsupportedType);
        }

        info!(
            datasets = runnable.len(),
            skipped = unsupported.len(),
            workspace = %workspace.root().display(),
            "Starting ETL run"
        );

        for (index, dataset) in runnable.iter().enumerate() {
            info!(
                "Processing dataset {} / {}: {}",
                index + 1,
                runnable.len(),
                dataset.name
            );
            report.metrics.total += 1;

            let span = info_span!("dataset", name = %dataset.name);
            match self.process(dataset, &workspace).instrument(span).await {
                Ok(0) => {
                    warn!(dataset = %dataset.name, "Dataset produced no records (skipped)");
                    report.record_skip(&dataset.name, SkipReason::NoRecords);
                }
                Ok(records) => {
                    info!(
                        dataset = %dataset.name,
                        records = records,
                        "✓ Dataset processed successfully"
                    );
                    report.record_success(records);
                }
                Err(err) => {
                    error!(
                        dataset = %dataset.name,
                        stage = %err.stage(),
                        error = %err,
                        "✗ Dataset failed (continuing with next dataset)"
                    );
                    report.record_failure(&dataset.name, err.stage(), err.to_string());
                    workspace.discard(&dataset.name).await;
                }
            }
        }

        report.finish(Utc::now());
        let m = &report.metrics;
        info!(
            total = m.total,
            success = m.success,
            skipped = m.skipped,
            failed = m.failed,
            records_processed = m.records_processed,
            "ETL run complete"
        );
        report
    }

    /// Run the three stages for one dataset, returning the number of records
    /// loaded
    async fn process(
        &self,
        dataset: &DatasetDescriptor,
        workspace: &RunWorkspace,
    ) -> Result<usize, StageError> {
        let work_dir = workspace
            .create_dataset_dir(&dataset.name)
            .await
            .map_err(|e| ExtractionError::io("failed to create dataset directory", e))?;

        let file = self.extractor.extract(dataset, &work_dir).await?;

        let records = self
            .transformers
            .transform(dataset, &file, &self.source_name)
            .await?;

        if records.is_empty() {
            return Ok(0);
        }

        let loaded = self.loader.load(&dataset.name, &records).await?;
        Ok(loaded)
    }
}
