//! End-to-end orchestrator runs with stage doubles
//!
//! The extractor writes canned CSV files and the loader keeps rows in memory,
//! so these tests cover failure isolation, skip accounting, cleanup of the
//! run workspace and idempotent reprocessing.

mod helpers;

use helpers::{csv_dataset, FakeExtractor, MemoryLoader};
use std::path::{Path, PathBuf};
use survey_etl::config::PipelineConfig;
use survey_etl::error::{ExtractionReason, Stage};
use survey_etl::ingest::{
    DatasetDescriptor, DatasetRegistry, EtlOrchestrator, FieldSpec, FileType, Scalar, SkipReason,
    TransformerRegistry,
};

const PLFS: &str = "year,state\n2021,Goa\n2022,Goa\n";
const HCES: &str = "year,state\n2023,Kerala\n";

fn pipeline_config(temp_root: &Path) -> PipelineConfig {
    PipelineConfig {
        temp_root: temp_root.to_path_buf(),
        ..PipelineConfig::default()
    }
}

fn orchestrator(
    extractor: FakeExtractor,
    loader: MemoryLoader,
    temp_root: &Path,
) -> EtlOrchestrator<FakeExtractor, MemoryLoader> {
    EtlOrchestrator::new(
        extractor,
        loader,
        TransformerRegistry::with_defaults(),
        &pipeline_config(temp_root),
    )
}

fn registry(names: &[&str]) -> DatasetRegistry {
    DatasetRegistry::new(names.iter().map(|n| csv_dataset(n)).collect()).unwrap()
}

/// The single `run-*` directory created under the temp root
fn run_dir(temp_root: &Path) -> PathBuf {
    let runs: Vec<PathBuf> = std::fs::read_dir(temp_root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(runs.len(), 1, "expected exactly one run directory");
    runs.into_iter().next().unwrap()
}

#[tokio::test]
async fn test_failure_in_one_dataset_does_not_stop_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let extractor = FakeExtractor::new(vec![
        ("PLFS", Ok(PLFS)),
        ("ASI", Err(ExtractionReason::LoginExhausted)),
        ("HCES", Ok(HCES)),
    ]);
    let loader = MemoryLoader::new();

    let report = orchestrator(extractor.clone(), loader.clone(), tmp.path())
        .run(&registry(&["PLFS", "ASI", "HCES"]))
        .await;

    assert_eq!(extractor.visited(), vec!["PLFS", "ASI", "HCES"]);
    assert_eq!(report.metrics.total, 3);
    assert_eq!(report.metrics.success, 2);
    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.records_processed, 3);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].dataset, "ASI");
    assert_eq!(report.failures[0].stage, Stage::Extract);
    assert!(report.failures[0].error.contains("login-exhausted"));

    assert_eq!(loader.loaded_datasets(), vec!["PLFS", "HCES"]);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_clean_run_exits_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let extractor = FakeExtractor::new(vec![("PLFS", Ok(PLFS))]);
    let loader = MemoryLoader::new();

    let report = orchestrator(extractor, loader.clone(), tmp.path())
        .run(&registry(&["PLFS"]))
        .await;

    assert!(report.is_success());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(loader.row_count(), 2);

    let rows = loader.rows.lock().unwrap();
    let record = &rows[&("PLFS".to_string(), 2021)];
    assert_eq!(record.variables["state"], Scalar::Text("Goa".to_string()));
    assert!(!record.variables.contains_key("year"));
    assert_eq!(record.metadata.source, "MoSPI");
    assert!(record.metadata.file_checksum.is_some());
}

#[tokio::test]
async fn test_transform_failure_loads_nothing_for_that_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    // second row has no year
    let extractor = FakeExtractor::new(vec![
        ("PLFS", Ok("year,state\n2021,Goa\n,Kerala\n")),
        ("HCES", Ok(HCES)),
    ]);
    let loader = MemoryLoader::new();

    let report = orchestrator(extractor, loader.clone(), tmp.path())
        .run(&registry(&["PLFS", "HCES"]))
        .await;

    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.success, 1);
    assert_eq!(report.failures[0].dataset, "PLFS");
    assert_eq!(report.failures[0].stage, Stage::Transform);
    assert!(report.failures[0].error.contains("year"));

    assert_eq!(loader.loaded_datasets(), vec!["HCES"]);
    assert_eq!(loader.row_count(), 1);
}

#[tokio::test]
async fn test_load_failure_is_attributed_to_load_stage() {
    let tmp = tempfile::tempdir().unwrap();
    let extractor = FakeExtractor::new(vec![("PLFS", Ok(PLFS)), ("HCES", Ok(HCES))]);
    let loader = MemoryLoader::failing_for("PLFS");

    let report = orchestrator(extractor, loader.clone(), tmp.path())
        .run(&registry(&["PLFS", "HCES"]))
        .await;

    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.failures[0].stage, Stage::Load);
    assert_eq!(report.metrics.success, 1);
    assert_eq!(loader.loaded_datasets(), vec!["HCES"]);
}

#[tokio::test]
async fn test_unsupported_type_is_skipped_without_extraction() {
    let tmp = tempfile::tempdir().unwrap();
    let stata = DatasetDescriptor::new(
        "NSS-78",
        "https://portal.test/catalog/NSS-78",
        FileType::Stata,
        vec![FieldSpec::number("year").required()],
    );
    let registry = DatasetRegistry::new(vec![csv_dataset("PLFS"), stata]).unwrap();
    let extractor = FakeExtractor::new(vec![("PLFS", Ok(PLFS))]);

    let report = orchestrator(extractor.clone(), MemoryLoader::new(), tmp.path())
        .run(&registry)
        .await;

    assert_eq!(extractor.visited(), vec!["PLFS"]);
    assert_eq!(report.metrics.total, 1);
    assert_eq!(report.metrics.success, 1);
    assert_eq!(report.metrics.skipped, 1);
    assert_eq!(report.skipped[0].dataset, "NSS-78");
    assert_eq!(report.skipped[0].reason, SkipReason::UnsupportedType);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_header_only_file_is_skipped_and_not_loaded() {
    let tmp = tempfile::tempdir().unwrap();
    let extractor = FakeExtractor::new(vec![("PLFS", Ok("year,state\n"))]);
    let loader = MemoryLoader::new();

    let report = orchestrator(extractor, loader.clone(), tmp.path())
        .run(&registry(&["PLFS"]))
        .await;

    assert_eq!(report.metrics.total, 1);
    assert_eq!(report.metrics.skipped, 1);
    assert_eq!(report.metrics.success, 0);
    assert_eq!(report.skipped[0].reason, SkipReason::NoRecords);
    assert!(loader.loaded_datasets().is_empty());
}

#[tokio::test]
async fn test_failed_dataset_directory_is_removed() {
    let tmp = tempfile::tempdir().unwrap();
    let extractor = FakeExtractor::new(vec![
        ("PLFS", Ok(PLFS)),
        ("ASI", Err(ExtractionReason::Timeout)),
    ]);

    orchestrator(extractor, MemoryLoader::new(), tmp.path())
        .run(&registry(&["PLFS", "ASI"]))
        .await;

    let run = run_dir(tmp.path());
    assert!(run.join("PLFS").join("PLFS.csv").exists());
    assert!(!run.join("ASI").exists());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let extractor = FakeExtractor::new(vec![("PLFS", Ok(PLFS)), ("HCES", Ok(HCES))]);
    let loader = MemoryLoader::new();
    let registry = registry(&["PLFS", "HCES"]);

    let first_root = tempfile::tempdir().unwrap();
    let first = orchestrator(extractor.clone(), loader.clone(), first_root.path())
        .run(&registry)
        .await;
    assert_eq!(loader.row_count(), 3);

    let second_root = tempfile::tempdir().unwrap();
    let second = orchestrator(extractor, loader.clone(), second_root.path())
        .run(&registry)
        .await;

    assert_eq!(loader.row_count(), 3);
    assert_eq!(first.metrics, second.metrics);
}

#[tokio::test]
async fn test_empty_registry_reports_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let report = orchestrator(FakeExtractor::default(), MemoryLoader::new(), tmp.path())
        .run(&DatasetRegistry::new(Vec::new()).unwrap())
        .await;

    assert_eq!(report.metrics.total, 0);
    assert!(report.is_success());
}
