//! Similarity store implementations for ctxprompt.

pub mod in_memory;
pub mod vector;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use vector::{cosine_similarity, rank};

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use ctxprompt_config::StoreConfig;
use ctxprompt_core::error::Error;
use ctxprompt_core::store::SimilarityStore;
use std::sync::Arc;

/// Build the store selected by configuration.
///
/// The persisted backend connects and prepares its schema here, so a bad
/// connection fails at construction rather than on the first query.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn SimilarityStore>, Error> {
    match config {
        StoreConfig::InMemory => {
            tracing::debug!("Using in-process similarity store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        #[cfg(feature = "postgres")]
        StoreConfig::Postgres(pg) => {
            let store = PostgresStore::connect(pg).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreConfig::Postgres(_) => Err(Error::config(
            "store backend 'postgres' requires the `postgres` feature",
        )),
    }
}
