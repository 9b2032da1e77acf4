//! Schema-driven transform stage
//!
//! A [`Transformer`] turns a downloaded file into coerced records for one
//! [`FileType`]. The [`TransformerRegistry`] picks the transformer for a
//! dataset, runs it off the async runtime and normalizes the output into
//! store-ready [`NormalizedRecord`]s.

pub mod coercer;
pub mod csv;

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use survey_common::checksum::compute_file_checksum;
use tracing::{debug, info, warn};

use crate::error::TransformError;
use crate::ingest::models::{NormalizedRecord, RecordMetadata, Scalar, TransformedRecord};
use crate::ingest::registry::{DatasetDescriptor, FieldSpec, FileType};

pub use self::coercer::coerce;
pub use self::csv::CsvTransformer;

/// Converts a source file into schema-coerced records
///
/// Implementations are synchronous and may block; callers run them on a
/// blocking thread.
pub trait Transformer: Send + Sync {
    fn file_type(&self) -> FileType;

    fn transform(
        &self,
        path: &Path,
        schema: &[FieldSpec],
    ) -> Result<Vec<TransformedRecord>, TransformError>;
}

/// Transformers keyed by the file type they handle
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    transformers: HashMap<FileType, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// An empty registry; every dataset would be skipped
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in transformers (CSV only)
    pub fn with_defaults() -> Self {
        Self::empty().register(Arc::new(CsvTransformer::new()))
    }

    pub fn register(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.insert(transformer.file_type(), transformer);
        self
    }

    pub fn supports(&self, file_type: &FileType) -> bool {
        self.transformers.contains_key(file_type)
    }

    /// Transform a downloaded file into normalized records
    ///
    /// Returns an empty vector when no transformer is registered for the
    /// dataset's type.
    pub async fn transform(
        &self,
        descriptor: &DatasetDescriptor,
        path: &Path,
        source: &str,
    ) -> Result<Vec<NormalizedRecord>, TransformError> {
        let Some(transformer) = self.transformers.get(&descriptor.file_type).cloned() else {
            warn!(
                dataset = %descriptor.name,
                file_type = %descriptor.file_type,
                "No transformer registered, returning no records"
            );
            return Ok(Vec::new());
        };

        ensure_readable(path).await?;

        let owned_path: PathBuf = path.to_path_buf();
        let schema = descriptor.schema.clone();
        let (records, checksum) = tokio::task::spawn_blocking(move || {
            let checksum = compute_file_checksum(&owned_path)
                .map_err(|e| TransformError::Aborted(format!("checksum failed: {}", e)))?;
            let records = transformer.transform(&owned_path, &schema)?;
            Ok::<_, TransformError>((records, checksum))
        })
        .await
        .map_err(|e| TransformError::Aborted(e.to_string()))??;

        debug!(
            dataset = %descriptor.name,
            rows = records.len(),
            checksum = %checksum,
            "Transformed source file"
        );

        let metadata = metadata_now(source, Some(checksum));
        let normalized = normalize(descriptor, records, &metadata)?;

        info!(
            dataset = %descriptor.name,
            records = normalized.len(),
            "✓ Transform complete"
        );
        Ok(normalized)
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.transformers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("TransformerRegistry")
            .field("file_types", &types)
            .finish()
    }
}

/// The file must exist and hold at least one byte
async fn ensure_readable(path: &Path) -> Result<(), TransformError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() == 0 => Err(TransformError::EmptyFile(path.to_path_buf())),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(TransformError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => Err(TransformError::Io(e)),
    }
}

/// Split each transformed record into its natural key and variables
pub fn normalize(
    descriptor: &DatasetDescriptor,
    records: Vec<TransformedRecord>,
    metadata: &RecordMetadata,
) -> Result<Vec<NormalizedRecord>, TransformError> {
    let year_field = descriptor.year_field();
    let survey_id = descriptor.survey_id();

    records
        .into_iter()
        .enumerate()
        .map(|(idx, mut variables)| {
            let year = variables
                .remove(year_field)
                .as_ref()
                .and_then(Scalar::as_integer)
                .and_then(|y| i32::try_from(y).ok())
                .ok_or_else(|| TransformError::MissingNaturalKey {
                    field: year_field.to_string(),
                    row: idx + 1,
                })?;

            Ok(NormalizedRecord {
                survey_id: survey_id.to_string(),
                year,
                variables,
                metadata: metadata.clone(),
            })
        })
        .collect()
}

/// Metadata stamp for records produced now
pub fn metadata_now(source: &str, checksum: Option<String>) -> RecordMetadata {
    RecordMetadata {
        source: source.to_string(),
        retrieved_at: Utc::now(),
        file_checksum: checksum,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn plfs() -> DatasetDescriptor {
        DatasetDescriptor::new(
            "PLFS",
            "https://example.org/plfs",
            FileType::Csv,
            vec![FieldSpec::number("year").required(), FieldSpec::string("state")],
        )
    }

    #[test]
    fn test_normalize_splits_key() {
        let mut record = TransformedRecord::new();
        record.insert("year".into(), Scalar::Integer(2021));
        record.insert("state".into(), Scalar::from("Goa"));

        let out = normalize(&plfs(), vec![record], &metadata_now("MoSPI", None)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].natural_key(), ("PLFS", 2021));
        assert_eq!(out[0].variables.len(), 1);
        assert_eq!(out[0].variables["state"], Scalar::from("Goa"));
        assert_eq!(out[0].metadata.source, "MoSPI");
    }

    #[test]
    fn test_normalize_rejects_non_integral_year() {
        let mut record = TransformedRecord::new();
        record.insert("year".into(), Scalar::Null);

        let err = normalize(&plfs(), vec![record], &metadata_now("MoSPI", None)).unwrap_err();
        assert!(matches!(err, TransformError::MissingNaturalKey { row: 1, .. }));
    }

    #[tokio::test]
    async fn test_transform_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PLFS.csv");
        std::fs::write(&path, "year,state\n2021,Goa\n").unwrap();

        let out = TransformerRegistry::with_defaults()
            .transform(&plfs(), &path, "MoSPI")
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].year, 2021);
        assert_eq!(out[0].metadata.file_checksum.as_deref().map(str::len), Some(64));
    }

    #[tokio::test]
    async fn test_transform_unregistered_type_is_empty() {
        let mut descriptor = plfs();
        descriptor.file_type = FileType::Stata;

        let out = TransformerRegistry::with_defaults()
            .transform(&descriptor, Path::new("/nonexistent.dta"), "MoSPI")
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_transform_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TransformerRegistry::with_defaults();

        let missing = dir.path().join("missing.csv");
        let err = registry.transform(&plfs(), &missing, "MoSPI").await.unwrap_err();
        assert!(matches!(err, TransformError::FileNotFound(_)));

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "").unwrap();
        let err = registry.transform(&plfs(), &empty, "MoSPI").await.unwrap_err();
        assert!(matches!(err, TransformError::EmptyFile(_)));
    }

    #[test]
    fn test_supports() {
        let registry = TransformerRegistry::with_defaults();
        assert!(registry.supports(&FileType::Csv));
        assert!(!registry.supports(&FileType::Stata));
        assert!(!TransformerRegistry::empty().supports(&FileType::Csv));
    }
}
