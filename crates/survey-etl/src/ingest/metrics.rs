//! Run metrics and the end-of-run report

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Stage;

/// Counters for one run; a new run starts from zero
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlMetrics {
    /// Datasets that entered extraction
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub records_processed: usize,
}

/// A dataset that failed, with the stage it failed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetFailure {
    pub dataset: String,
    #[serde(serialize_with = "serialize_stage")]
    pub stage: Stage,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// No transformer is registered for the dataset's file type
    UnsupportedType,
    /// The source produced zero records
    NoRecords,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDataset {
    pub dataset: String,
    pub reason: SkipReason,
}

/// Outcome of one orchestrator run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub metrics: EtlMetrics,
    pub failures: Vec<DatasetFailure>,
    pub skipped: Vec<SkippedDataset>,
    pub started_at: DateTime<Utc>,
    /// When the last dataset finished; the run's fetch time
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            metrics: EtlMetrics::default(),
            failures: Vec::new(),
            skipped: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    pub fn record_success(&mut self, records: usize) {
        self.metrics.success += 1;
        self.metrics.records_processed += records;
    }

    pub fn record_skip(&mut self, dataset: &str, reason: SkipReason) {
        self.metrics.skipped += 1;
        self.skipped.push(SkippedDataset {
            dataset: dataset.to_string(),
            reason,
        });
    }

    pub fn record_failure(&mut self, dataset: &str, stage: Stage, error: String) {
        self.metrics.failed += 1;
        self.failures.push(DatasetFailure {
            dataset: dataset.to_string(),
            stage,
            error,
        });
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = finished_at;
    }

    pub fn is_success(&self) -> bool {
        self.metrics.failed == 0
    }

    /// Process exit status: non-zero iff any dataset failed
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn summary(&self) -> String {
        let m = &self.metrics;
        let mut out = format!(
            "ETL run finished in {}s: {} total, {} succeeded, {} skipped, {} failed, {} records processed",
            self.duration().num_seconds(),
            m.total,
            m.success,
            m.skipped,
            m.failed,
            m.records_processed
        );

        for skip in &self.skipped {
            let reason = match skip.reason {
                SkipReason::UnsupportedType => "unsupported file type",
                SkipReason::NoRecords => "no records",
            };
            out.push_str(&format!("\n  - skipped {}: {}", skip.dataset, reason));
        }
        for failure in &self.failures {
            out.push_str(&format!(
                "\n  ✗ {} failed during {}: {}",
                failure.dataset, failure.stage, failure.error
            ));
        }
        out
    }
}

fn serialize_stage<S: serde::Serializer>(stage: &Stage, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(stage.as_str())
}
