//! CSV transformer
//!
//! Streams the file row by row with the `csv` crate. The header row names the
//! columns; schema fields are looked up by header name, so column order in the
//! source does not matter and extra columns are ignored.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::coercer::coerce;
use super::Transformer;
use crate::error::TransformError;
use crate::ingest::models::TransformedRecord;
use crate::ingest::registry::{FieldSpec, FileType};

#[derive(Debug, Default, Clone)]
pub struct CsvTransformer;

impl CsvTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Transform CSV content from any reader
    ///
    /// The first coercion failure stops the stream and discards every row
    /// produced so far.
    pub fn transform_reader<R: Read>(
        &self,
        reader: R,
        schema: &[FieldSpec],
    ) -> Result<Vec<TransformedRecord>, TransformError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        // cells are decoded lossily; a stray Latin-1 byte never aborts a file
        let headers: Vec<String> = csv_reader
            .byte_headers()
            .map_err(|e| malformed(0, e))?
            .iter()
            .map(|name| String::from_utf8_lossy(name).trim().to_string())
            .collect();
        let columns: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        let missing: Vec<&str> = schema
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| !columns.contains_key(name))
            .collect();
        if !missing.is_empty() {
            debug!(columns = ?missing, "Schema fields absent from CSV header");
        }

        let mut records = Vec::new();
        for (idx, row) in csv_reader.byte_records().enumerate() {
            let row_number = idx + 1;
            let row = row.map_err(|e| malformed(row_number, e))?;

            let mut record = TransformedRecord::new();
            for field in schema {
                let raw = columns
                    .get(field.name.as_str())
                    .and_then(|&col| row.get(col))
                    .map(String::from_utf8_lossy);
                record.insert(field.name.clone(), coerce(field, raw.as_deref(), row_number)?);
            }
            records.push(record);
        }

        Ok(records)
    }
}

impl Transformer for CsvTransformer {
    fn file_type(&self) -> FileType {
        FileType::Csv
    }

    fn transform(
        &self,
        path: &Path,
        schema: &[FieldSpec],
    ) -> Result<Vec<TransformedRecord>, TransformError> {
        let file = std::fs::File::open(path)?;
        self.transform_reader(std::io::BufReader::new(file), schema)
    }
}

fn malformed(row: usize, err: csv::Error) -> TransformError {
    TransformError::Malformed {
        row,
        message: err.to_string(),
    }
}
