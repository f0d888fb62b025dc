//! SimilarityStore trait: exact top-K retrieval by cosine similarity.
//!
//! Every backend honors the same contract:
//! - `add` is an upsert keyed by id; the first insert fixes the store's
//!   dimension and later inserts of another length fail with
//!   [`StoreError::DimensionMismatch`].
//! - `add_many` applies `add` in order and is **not** atomic: a failure
//!   partway leaves the earlier adds in place.
//! - `search` with `k == 0` returns nothing; `k` beyond the store size returns
//!   every entry, fully ranked by descending similarity.
//! - `delete` of an absent id is a no-op.

use async_trait::async_trait;

use crate::embedding::{Embedding, ScoredEmbedding};
use crate::error::StoreError;

/// The core SimilarityStore trait.
///
/// Implementations: in-process linear scan, PostgreSQL + pgvector.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    /// The backend kind (e.g. "in_mem", "pg_sql").
    fn kind(&self) -> &str;

    /// Insert or overwrite an embedding.
    async fn add(&self, embedding: Embedding) -> Result<(), StoreError>;

    /// Insert several embeddings, stopping at the first failure.
    async fn add_many(&self, embeddings: Vec<Embedding>) -> Result<(), StoreError> {
        for embedding in embeddings {
            self.add(embedding).await?;
        }
        Ok(())
    }

    /// Up to `k` embeddings ranked by descending cosine similarity to `query`.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEmbedding>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Remove an embedding by id. Absent ids are not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Drop every entry.
    async fn clear(&self) -> Result<(), StoreError>;
}
