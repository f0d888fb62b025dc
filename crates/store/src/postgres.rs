//! PostgreSQL + pgvector similarity store.
//!
//! Implements [`SimilarityStore`] with:
//! - Upsert via `INSERT ... ON CONFLICT (id) DO UPDATE`
//! - Exact ranking with pgvector's cosine distance operator `<=>`
//! - Metadata kept as an opaque JSONB blob
//!
//! # Setup
//!
//! ```sql
//! CREATE EXTENSION IF NOT EXISTS vector;
//! ```
//!
//! [`PostgresStore::ensure_schema`] creates the table when the vector width
//! is known (from configuration, or from the first insert).
//!
//! # Ranking direction
//!
//! `<=>` is cosine *distance* (`1 - cosine similarity`), so ascending distance
//! is descending similarity. pgvector yields NaN for a zero-norm operand;
//! such rows are ranked as distance 1 (similarity 0), matching the
//! in-process store.
//!
//! # Feature gate
//!
//! This module is behind the `postgres` feature flag (on by default).

use async_trait::async_trait;
use ctxprompt_config::PostgresConfig;
use ctxprompt_core::embedding::{Embedding, ScoredEmbedding, metadata_from_json, metadata_to_json};
use ctxprompt_core::error::StoreError;
use ctxprompt_core::store::SimilarityStore;
use sqlx::Row;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Table and column names. Validated as plain identifiers by the config
/// layer before they reach any SQL string.
#[derive(Debug, Clone)]
struct Layout {
    table: String,
    id: String,
    vector: String,
    meta: String,
}

impl Layout {
    fn from_config(config: &PostgresConfig) -> Result<Self, StoreError> {
        let layout = Self {
            table: config.table.clone(),
            id: config.id_column.clone(),
            vector: config.vector_column.clone(),
            meta: config.metadata_column.clone(),
        };
        for name in [&layout.table, &layout.id, &layout.vector, &layout.meta] {
            if !ctxprompt_config::is_sql_identifier(name) {
                return Err(StoreError::Storage(format!(
                    "'{name}' is not a plain SQL identifier"
                )));
            }
        }
        Ok(layout)
    }

    fn create_table_sql(&self, dimension: usize) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             {id} TEXT PRIMARY KEY, \
             {vec} vector({dimension}) NOT NULL, \
             {meta} JSONB NOT NULL DEFAULT '{{}}'::jsonb)",
            table = self.table,
            id = self.id,
            vec = self.vector,
            meta = self.meta,
        )
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {table} ({id}, {vec}, {meta}) \
             VALUES ($1, $2::vector, $3::jsonb) \
             ON CONFLICT ({id}) DO UPDATE SET \
               {vec} = EXCLUDED.{vec}, \
               {meta} = EXCLUDED.{meta}",
            table = self.table,
            id = self.id,
            vec = self.vector,
            meta = self.meta,
        )
    }

    /// Ascending cosine distance, NaN folded to 1, id as the tie-break.
    fn search_sql(&self) -> String {
        format!(
            "SELECT id, vec, meta, 1 - dist AS similarity FROM (\
               SELECT {id} AS id, {vec}::text AS vec, COALESCE({meta}::text, '') AS meta, \
               COALESCE(NULLIF({vec} <=> $1::vector, 'NaN'::float8), 1) AS dist \
               FROM {table}\
             ) ranked \
             ORDER BY dist ASC, id ASC \
             LIMIT $2",
            table = self.table,
            id = self.id,
            vec = self.vector,
            meta = self.meta,
        )
    }

    fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) AS cnt FROM {}", self.table)
    }

    fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE {} = $1", self.table, self.id)
    }

    fn clear_sql(&self) -> String {
        format!("TRUNCATE TABLE {}", self.table)
    }
}

/// PostgreSQL similarity store backed by a pgvector column.
pub struct PostgresStore {
    pool: PgPool,
    layout: Layout,
    /// Width of the vector column. `None` until the table exists.
    dimension: RwLock<Option<usize>>,
}

impl PostgresStore {
    /// Build the pool from configuration, then make sure the schema exists.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let layout = Layout::from_config(config)?;

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .database(&config.database)
            .application_name(&config.session.application_name)
            .options([
                ("statement_timeout", config.session.statement_timeout_ms.to_string()),
                ("lock_timeout", config.session.lock_timeout_ms.to_string()),
                (
                    "idle_in_transaction_session_timeout",
                    config.session.idle_in_transaction_timeout_ms.to_string(),
                ),
            ]);
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .min_connections(config.pool.min_connections)
            .max_lifetime(Duration::from_secs(config.pool.max_lifetime_secs))
            .idle_timeout(Duration::from_secs(config.pool.idle_timeout_secs))
            .acquire_timeout(Duration::from_secs(config.pool.acquire_timeout_secs))
            .test_before_acquire(config.pool.test_before_acquire)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("PostgreSQL connection failed: {e}")))?;

        info!(
            host = %config.host,
            database = %config.database,
            table = %layout.table,
            "Connected to PostgreSQL similarity store"
        );

        let store = Self {
            pool,
            layout,
            dimension: RwLock::new(None),
        };
        store.ensure_schema(config.dimension).await?;
        Ok(store)
    }

    /// Create the extension and, when the width is known, the table.
    ///
    /// An existing table's width wins over discovery; a configured width
    /// that disagrees with the existing table is a migration failure.
    pub async fn ensure_schema(&self, configured: Option<usize>) -> Result<(), StoreError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("pgvector extension: {e}")))?;

        let existing = self.probe_dimension().await?;
        let dimension = match (existing, configured) {
            (Some(actual), Some(expected)) if actual != expected => {
                return Err(StoreError::MigrationFailed(format!(
                    "table {} holds vector({actual}) but configuration says {expected}",
                    self.layout.table
                )));
            }
            (Some(actual), _) => Some(actual),
            (None, Some(expected)) => {
                self.create_table(expected).await?;
                Some(expected)
            }
            (None, None) => None,
        };

        *self.dimension.write().await = dimension;
        match dimension {
            Some(d) => info!(table = %self.layout.table, dimension = d, "Similarity schema ready"),
            None => info!(
                table = %self.layout.table,
                "Vector width unknown, table will be created on first insert"
            ),
        }
        Ok(())
    }

    /// The vector width of the backing table, if it exists yet.
    pub async fn dimension(&self) -> Option<usize> {
        *self.dimension.read().await
    }

    async fn create_table(&self, dimension: usize) -> Result<(), StoreError> {
        sqlx::query(&self.layout.create_table_sql(dimension))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("create table: {e}")))?;
        Ok(())
    }

    /// Read the declared width of the vector column from the catalog.
    async fn probe_dimension(&self) -> Result<Option<usize>, StoreError> {
        let row = sqlx::query(
            "SELECT a.atttypmod AS dim FROM pg_attribute a \
             WHERE a.attrelid = to_regclass($1) AND a.attname = $2 AND NOT a.attisdropped",
        )
        .bind(&self.layout.table)
        .bind(&self.layout.vector)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Failed to inspect schema: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let dim: i32 = row
            .try_get("dim")
            .map_err(|e| StoreError::QueryFailed(format!("Failed to inspect schema: {e}")))?;
        Ok(usize::try_from(dim).ok().filter(|d| *d > 0))
    }

    /// Check `actual` against the table width, creating the table on first use.
    async fn establish_dimension(&self, actual: usize) -> Result<(), StoreError> {
        if let Some(expected) = *self.dimension.read().await {
            return check_dimension(expected, actual);
        }

        let mut slot = self.dimension.write().await;
        match *slot {
            Some(expected) => check_dimension(expected, actual),
            None => {
                self.create_table(actual).await?;
                *slot = Some(actual);
                info!(table = %self.layout.table, dimension = actual, "Created similarity table");
                Ok(())
            }
        }
    }
}

fn check_dimension(expected: usize, actual: usize) -> Result<(), StoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::DimensionMismatch { expected, actual })
    }
}

/// Format a vector as a pgvector literal: `[0.1,0.2,0.3]`.
pub fn format_vector(vector: &[f32]) -> String {
    format!(
        "[{}]",
        vector
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Parse a pgvector text literal back into floats.
pub fn parse_vector(literal: &str) -> Result<Vec<f32>, StoreError> {
    let inner = literal
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| StoreError::QueryFailed(format!("Malformed vector literal: {literal}")))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| StoreError::QueryFailed(format!("Malformed vector component '{part}': {e}")))
        })
        .collect()
}

/// Map a ranked row's `1 - distance` onto a finite similarity.
fn similarity_from_row(raw: f64) -> f32 {
    if raw.is_finite() { raw as f32 } else { 0.0 }
}

/// Convert a database row into a scored embedding.
fn row_to_scored(row: &PgRow) -> Result<ScoredEmbedding, StoreError> {
    let column = |e: sqlx::Error| StoreError::QueryFailed(format!("Failed to decode row: {e}"));

    let id: String = row.try_get("id").map_err(column)?;
    let vec: String = row.try_get("vec").map_err(column)?;
    let meta: String = row.try_get("meta").map_err(column)?;
    let similarity: f64 = row.try_get("similarity").map_err(column)?;

    Ok(ScoredEmbedding {
        embedding: Embedding {
            id,
            vector: parse_vector(&vec)?,
            metadata: metadata_from_json(&meta)?,
        },
        score: similarity_from_row(similarity),
    })
}

#[async_trait]
impl SimilarityStore for PostgresStore {
    fn kind(&self) -> &str {
        "pg_sql"
    }

    async fn add(&self, embedding: Embedding) -> Result<(), StoreError> {
        if embedding.vector.is_empty() {
            return Err(StoreError::Storage("embedding vector must not be empty".into()));
        }
        self.establish_dimension(embedding.dimension()).await?;

        let meta = metadata_to_json(&embedding.metadata)?;
        sqlx::query(&self.layout.upsert_sql())
            .bind(&embedding.id)
            .bind(format_vector(&embedding.vector))
            .bind(meta)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to upsert embedding: {e}")))?;

        debug!(id = %embedding.id, "Upserted embedding");
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEmbedding>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(expected) = self.dimension().await else {
            return Ok(Vec::new());
        };
        check_dimension(expected, query.len())?;

        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        let rows = sqlx::query(&self.layout.search_sql())
            .bind(format_vector(query))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Vector search failed: {e}")))?;

        let results = rows.iter().map(row_to_scored).collect::<Result<Vec<_>, _>>()?;
        debug!(k, returned = results.len(), "pgvector search");
        Ok(results)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        if self.dimension().await.is_none() {
            return Ok(0);
        }
        let row = sqlx::query(&self.layout.count_sql())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to count embeddings: {e}")))?;

        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("Failed to count embeddings: {e}")))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.dimension().await.is_none() {
            return Ok(());
        }
        let result = sqlx::query(&self.layout.delete_sql())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to delete embedding: {e}")))?;

        debug!(id = %id, deleted = result.rows_affected() > 0, "Delete embedding");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        if self.dimension().await.is_none() {
            return Ok(());
        }
        sqlx::query(&self.layout.clear_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to clear embeddings: {e}")))?;

        info!(table = %self.layout.table, "Cleared all embeddings");
        Ok(())
    }
}

// ── Unit tests (no DB required) ──────────────────────────────────────────
