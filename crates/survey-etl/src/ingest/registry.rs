//! Dataset registry
//!
//! The registry is an ordered list of dataset descriptors loaded once at the
//! start of a run. Any malformed entry rejects the whole document so a run
//! never starts from a partial registry.
//!
//! ```yaml
//! datasets:
//!   - name: PLFS
//!     url: https://microdata.gov.in/nada43/index.php/catalog/PLFS
//!     type: csv
//!     schema:
//!       - { name: year, type: number, required: true }
//!       - { name: sector, type: enum, values: [rural, urban] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::ingest::workspace::sanitize_name;

/// Field name holding the year when a descriptor does not say otherwise
pub const DEFAULT_YEAR_FIELD: &str = "year";

/// Source file format as declared in the registry
///
/// Unknown formats deserialize into [`FileType::Other`] rather than failing;
/// they are skipped when the run starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileType {
    Csv,
    Stata,
    Other(String),
}

impl FileType {
    pub fn as_str(&self) -> &str {
        match self {
            FileType::Csv => "csv",
            FileType::Stata => "stata",
            FileType::Other(other) => other,
        }
    }
}

impl From<&str> for FileType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => FileType::Csv,
            "stata" | "dta" => FileType::Stata,
            other => FileType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FileType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FileType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(FileType::from(raw.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Enum,
}

/// One column of a dataset's declared schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Allowed members, only meaningful for `enum` fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl FieldSpec {
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::String,
            required: false,
            values: None,
        }
    }

    pub fn number(name: &str) -> Self {
        Self {
            field_type: FieldType::Number,
            ..Self::string(name)
        }
    }

    pub fn enumeration(name: &str, values: &[&str]) -> Self {
        Self {
            field_type: FieldType::Enum,
            values: Some(values.iter().map(|v| v.to_string()).collect()),
            ..Self::string(name)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Static description of one dataset published on the portal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub schema: Vec<FieldSpec>,
    /// Identifier stored in the `survey_id` column (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_id: Option<String>,
    /// Schema field that carries the year half of the natural key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_field: Option<String>,
}

impl DatasetDescriptor {
    pub fn new(name: &str, url: &str, file_type: FileType, schema: Vec<FieldSpec>) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            file_type,
            schema,
            survey_id: None,
            year_field: None,
        }
    }

    pub fn survey_id(&self) -> &str {
        self.survey_id.as_deref().unwrap_or(&self.name)
    }

    pub fn year_field(&self) -> &str {
        self.year_field.as_deref().unwrap_or(DEFAULT_YEAR_FIELD)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ConfigError::invalid("<unnamed>", "name cannot be empty"));
        }

        let url = url::Url::parse(&self.url)
            .map_err(|e| ConfigError::invalid(name, format!("invalid url '{}': {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                name,
                format!("url scheme must be http or https, got '{}'", url.scheme()),
            ));
        }

        if self.schema.is_empty() {
            return Err(ConfigError::invalid(name, "schema cannot be empty"));
        }

        let mut seen = HashSet::new();
        for field in &self.schema {
            if field.name.trim().is_empty() {
                return Err(ConfigError::invalid(name, "schema field name cannot be empty"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigError::invalid(
                    name,
                    format!("duplicate schema field '{}'", field.name),
                ));
            }
            match (field.field_type, &field.values) {
                (FieldType::Enum, None) => {
                    return Err(ConfigError::invalid(
                        name,
                        format!("enum field '{}' has no values", field.name),
                    ));
                }
                (FieldType::Enum, Some(values)) if values.is_empty() => {
                    return Err(ConfigError::invalid(
                        name,
                        format!("enum field '{}' has no values", field.name),
                    ));
                }
                (FieldType::String | FieldType::Number, Some(_)) => {
                    return Err(ConfigError::invalid(
                        name,
                        format!("field '{}' declares values but is not an enum", field.name),
                    ));
                }
                _ => {}
            }
        }

        if !seen.contains(self.year_field()) {
            return Err(ConfigError::invalid(
                name,
                format!("year field '{}' is not declared in the schema", self.year_field()),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetRegistry {
    pub datasets: Vec<DatasetDescriptor>,
}

impl DatasetRegistry {
    /// Build a registry from descriptors, validating every entry
    pub fn new(datasets: Vec<DatasetDescriptor>) -> Result<Self, ConfigError> {
        let registry = Self { datasets };
        registry.validate()?;
        Ok(registry)
    }

    /// Load and validate a YAML registry file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let registry = Self::from_yaml(&content)?;
        info!(
            path = %path.display(),
            datasets = registry.datasets.len(),
            "Loaded dataset registry"
        );
        Ok(registry)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let registry: DatasetRegistry = serde_yaml::from_str(content)?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut dirs: HashMap<String, &str> = HashMap::new();
        for dataset in &self.datasets {
            dataset.validate()?;
            if !names.insert(dataset.name.as_str()) {
                return Err(ConfigError::invalid(&dataset.name, "duplicate dataset name"));
            }
            // each dataset owns one working directory
            if let Some(other) = dirs.insert(sanitize_name(&dataset.name), &dataset.name) {
                return Err(ConfigError::invalid(
                    &dataset.name,
                    format!("name maps to the same working directory as '{}'", other),
                ));
            }
            debug!(dataset = %dataset.name, file_type = %dataset.file_type, "Registry entry ok");
        }
        Ok(())
    }

    /// Keep only the named datasets, preserving registry order
    ///
    /// An empty filter keeps everything. Naming a dataset that is not in the
    /// registry is a configuration error.
    pub fn filter_names(self, names: &[String]) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Ok(self);
        }

        if let Some(unknown) = names
            .iter()
            .find(|n| !self.datasets.iter().any(|d| &d.name == *n))
        {
            return Err(ConfigError::invalid(unknown, "not present in the registry"));
        }

        Ok(Self {
            datasets: self
                .datasets
                .into_iter()
                .filter(|d| names.contains(&d.name))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.datasets.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
datasets:
  - name: PLFS
    url: https://microdata.gov.in/nada43/index.php/catalog/PLFS
    type: csv
    schema:
      - { name: year, type: number, required: true }
      - { name: state, type: string }
      - { name: sector, type: enum, values: [rural, urban] }
  - name: NSS
    url: https://microdata.gov.in/nada43/index.php/catalog/NSS
    type: stata
    survey_id: nss-78
    schema:
      - { name: year, type: number, required: true }
"#;

    #[test]
    fn test_parse_registry() {
        let registry = DatasetRegistry::from_yaml(SAMPLE).unwrap();
        assert_eq!(registry.len(), 2);

        let plfs = &registry.datasets[0];
        assert_eq!(plfs.file_type, FileType::Csv);
        assert_eq!(plfs.survey_id(), "PLFS");
        assert_eq!(plfs.year_field(), "year");
        assert!(plfs.schema[0].required);
        assert!(!plfs.schema[1].required);
        assert_eq!(plfs.schema[2].field_type, FieldType::Enum);

        let nss = &registry.datasets[1];
        assert_eq!(nss.file_type, FileType::Stata);
        assert_eq!(nss.survey_id(), "nss-78");
    }

    #[test]
    fn test_unknown_type_is_not_a_config_error() {
        let yaml = r#"
datasets:
  - name: HCES
    url: https://example.org/hces
    type: spss
    schema:
      - { name: year, type: number }
"#;
        let registry = DatasetRegistry::from_yaml(yaml).unwrap();
        assert_eq!(
            registry.datasets[0].file_type,
            FileType::Other("spss".to_string())
        );
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let schema = vec![FieldSpec::number("year")];
        let a = DatasetDescriptor::new("PLFS", "https://example.org/a", FileType::Csv, schema.clone());
        let b = DatasetDescriptor::new("PLFS", "https://example.org/b", FileType::Csv, schema);
        let err = DatasetRegistry::new(vec![a, b]).unwrap_err();
        assert!(err.to_string().contains("duplicate dataset name"));
    }

    #[test]
    fn test_rejects_names_sharing_a_working_directory() {
        let schema = vec![FieldSpec::number("year")];
        let a = DatasetDescriptor::new("PLFS 2021", "https://example.org/a", FileType::Csv, schema.clone());
        let b = DatasetDescriptor::new("PLFS_2021", "https://example.org/b", FileType::Csv, schema);

        let err = DatasetRegistry::new(vec![a, b]).unwrap_err();
        assert!(matches!(&err, ConfigError::Invalid { dataset, .. } if dataset == "PLFS_2021"));
        assert!(err.to_string().contains("'PLFS 2021'"));
    }

    #[test]
    fn test_rejects_enum_without_values() {
        let mut field = FieldSpec::enumeration("sector", &[]);
        field.values = None;
        let d = DatasetDescriptor::new(
            "PLFS",
            "https://example.org/a",
            FileType::Csv,
            vec![FieldSpec::number("year"), field],
        );
        assert!(matches!(
            DatasetRegistry::new(vec![d]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_values_on_non_enum() {
        let mut field = FieldSpec::string("state");
        field.values = Some(vec!["KA".into()]);
        let d = DatasetDescriptor::new(
            "PLFS",
            "https://example.org/a",
            FileType::Csv,
            vec![FieldSpec::number("year"), field],
        );
        assert!(DatasetRegistry::new(vec![d]).is_err());
    }

    #[test]
    fn test_rejects_bad_url_and_missing_year_field() {
        let d = DatasetDescriptor::new("PLFS", "ftp://example.org/a", FileType::Csv, vec![FieldSpec::number("year")]);
        assert!(DatasetRegistry::new(vec![d]).is_err());

        let d = DatasetDescriptor::new("PLFS", "https://example.org/a", FileType::Csv, vec![FieldSpec::string("state")]);
        let err = DatasetRegistry::new(vec![d]).unwrap_err();
        assert!(err.to_string().contains("year field"));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = DatasetRegistry::from_yaml("datasets: [ { name: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_filter_names() {
        let registry = DatasetRegistry::from_yaml(SAMPLE).unwrap();

        let only = registry.clone().filter_names(&["NSS".to_string()]).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only.datasets[0].name, "NSS");

        assert_eq!(registry.clone().filter_names(&[]).unwrap().len(), 2);
        assert!(registry.filter_names(&["ASI".to_string()]).is_err());
    }
}
