//! Survey dataset ingestion
//!
//! # Architecture
//!
//! - **registry**: dataset descriptors loaded from YAML
//! - **extract**: authenticated portal extraction (login FSM, CAPTCHA prompt, download)
//! - **transform**: schema-driven coercion of downloaded files
//! - **storage**: idempotent PostgreSQL upsert keyed on `(survey_id, year)`
//! - **orchestrator**: sequential per-dataset pipeline with failure isolation
//! - **metrics** / **workspace**: run report and per-dataset temp directories

pub mod extract;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod storage;
pub mod transform;
pub mod workspace;

pub use extract::{Extractor, PortalExtractor};
pub use metrics::{DatasetFailure, EtlMetrics, RunReport, SkipReason};
pub use models::{NormalizedRecord, RecordMetadata, Scalar, TransformedRecord};
pub use orchestrator::EtlOrchestrator;
pub use registry::{DatasetDescriptor, DatasetRegistry, FieldSpec, FieldType, FileType};
pub use storage::{Loader, PgLoader, StoreSummary};
pub use transform::{Transformer, TransformerRegistry};
pub use workspace::RunWorkspace;
