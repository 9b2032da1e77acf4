//! Load stage: idempotent upsert into PostgreSQL
//!
//! Records are keyed on `(survey_id, year)`. Loading a record whose key is
//! already stored overwrites its `variables`, `metadata` and `updated_at`, so
//! reprocessing a dataset never creates duplicates.
//!
//! Each `load` call is one transaction made of multi-row `INSERT .. ON
//! CONFLICT` statements of at most `batch_size` rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::LoadError;
use crate::ingest::models::NormalizedRecord;

/// Persists normalized records for one dataset
#[async_trait]
pub trait Loader: Send + Sync {
    /// Upsert `records`, returning how many rows were written
    ///
    /// An empty slice is a valid no-op.
    async fn load(&self, dataset: &str, records: &[NormalizedRecord]) -> Result<usize, LoadError>;
}

/// Per-survey view of what the store holds
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoreSummary {
    pub survey_id: String,
    pub records: i64,
    pub first_year: i32,
    pub last_year: i32,
    pub last_updated: DateTime<Utc>,
}

/// Bind parameters per upserted row
const BIND_PARAMS_PER_ROW: usize = 4;

/// Largest chunk that fits PostgreSQL's 65535 bind-parameter limit
pub const MAX_BATCH_SIZE: usize = u16::MAX as usize / BIND_PARAMS_PER_ROW;

#[derive(Debug, Clone)]
pub struct PgLoader {
    db: PgPool,
    batch_size: usize,
}

impl PgLoader {
    pub fn new(db: PgPool, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Open the shared connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, LoadError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| LoadError::Connection(e.to_string()))?;

        info!("Database connection pool established");
        Ok(pool)
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    /// Most recently applied schema version tag, if any
    pub async fn schema_version(&self) -> Result<Option<String>, LoadError> {
        let version = sqlx::query_scalar::<_, String>(
            "SELECT version FROM schema_version ORDER BY applied_at DESC, version DESC LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;
        Ok(version)
    }

    /// Row count, year range and last update per survey
    pub async fn summaries(&self) -> Result<Vec<StoreSummary>, LoadError> {
        let rows = sqlx::query_as::<_, StoreSummary>(
            r#"
            SELECT survey_id,
                   COUNT(*)        AS records,
                   MIN(year)       AS first_year,
                   MAX(year)       AS last_year,
                   MAX(updated_at) AS last_updated
            FROM datasets
            GROUP BY survey_id
            ORDER BY survey_id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn upsert_batch(
        &self,
        tx: &mut sqlx::Transaction<'_, Postgres>,
        records: &[&NormalizedRecord],
    ) -> Result<u64, LoadError> {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO datasets (survey_id, year, variables, metadata) ");

        query_builder.push_values(records.iter(), |mut b, record| {
            b.push_bind(&record.survey_id)
                .push_bind(record.year)
                .push_bind(Json(&record.variables))
                .push_bind(Json(&record.metadata));
        });

        query_builder.push(
            " ON CONFLICT (survey_id, year) DO UPDATE SET \
             variables = EXCLUDED.variables, \
             metadata = EXCLUDED.metadata, \
             updated_at = NOW()",
        );

        let result = query_builder.build().execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Loader for PgLoader {
    async fn load(&self, dataset: &str, records: &[NormalizedRecord]) -> Result<usize, LoadError> {
        if records.is_empty() {
            warn!(dataset = %dataset, "No records to load");
            return Ok(0);
        }

        let unique = collapse_by_key(records);
        if unique.len() < records.len() {
            warn!(
                dataset = %dataset,
                dropped = records.len() - unique.len(),
                kept = unique.len(),
                "Records share a (survey_id, year) key; only the last row per key is stored"
            );
        }

        let mut tx = self.db.begin().await?;
        let total_chunks = unique.len().div_ceil(self.batch_size);
        let mut written = 0u64;

        for (chunk_idx, chunk) in unique.chunks(self.batch_size).enumerate() {
            debug!(
                dataset = %dataset,
                "Upserting chunk {} / {} ({} records)",
                chunk_idx + 1,
                total_chunks,
                chunk.len()
            );
            written += self.upsert_batch(&mut tx, chunk).await?;
        }

        tx.commit().await?;

        info!(dataset = %dataset, records = written, "✓ Load complete");
        Ok(written as usize)
    }
}

/// Keep one record per `(survey_id, year)`: the last one wins, placed where
/// the key first appeared
fn collapse_by_key(records: &[NormalizedRecord]) -> Vec<&NormalizedRecord> {
    let mut positions: HashMap<(&str, i32), usize> = HashMap::new();
    let mut unique: Vec<&NormalizedRecord> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&record.natural_key()) {
            Some(&idx) => unique[idx] = record,
            None => {
                positions.insert(record.natural_key(), unique.len());
                unique.push(record);
            }
        }
    }

    unique
}
