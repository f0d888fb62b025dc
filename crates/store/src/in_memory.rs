//! In-process store: linear scan over a locked map.

use async_trait::async_trait;
use ctxprompt_core::embedding::{Embedding, ScoredEmbedding};
use ctxprompt_core::error::StoreError;
use ctxprompt_core::store::SimilarityStore;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::vector;

#[derive(Default)]
struct Inner {
    /// id → (insertion sequence, embedding). An upsert keeps its sequence.
    entries: HashMap<String, (u64, Embedding)>,
    next_seq: u64,
    /// Fixed by the first insert, released again by `clear`.
    dimension: Option<usize>,
}

/// An in-memory store that keeps every embedding in a map and answers
/// searches with a full scan and sort.
///
/// All access goes through one lock; a search holds the read side for the
/// whole scan.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// The dimension established by the first insert, if any.
    pub async fn dimension(&self) -> Option<usize> {
        self.inner.read().await.dimension
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SimilarityStore for InMemoryStore {
    fn kind(&self) -> &str {
        "in_mem"
    }

    async fn add(&self, embedding: Embedding) -> Result<(), StoreError> {
        if embedding.vector.is_empty() {
            return Err(StoreError::Storage("embedding vector must not be empty".into()));
        }

        let mut inner = self.inner.write().await;
        let actual = embedding.dimension();
        match inner.dimension {
            Some(expected) if expected != actual => {
                return Err(StoreError::DimensionMismatch { expected, actual });
            }
            Some(_) => {}
            None => inner.dimension = Some(actual),
        }

        let seq = match inner.entries.get(&embedding.id) {
            Some((seq, _)) => *seq,
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                seq
            }
        };
        inner.entries.insert(embedding.id.clone(), (seq, embedding));
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredEmbedding>, StoreError> {
        let inner = self.inner.read().await;
        if let Some(expected) = inner.dimension
            && expected != query.len()
        {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        let results = vector::rank(
            inner.entries.values().map(|(seq, e)| (*seq, e)),
            query,
            k,
        );
        tracing::debug!(k, returned = results.len(), "In-memory search");
        Ok(results)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().await.entries.len())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.write().await.entries.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.dimension = None;
        Ok(())
    }
}
