//! # ctxprompt core
//!
//! Domain types, traits, and error definitions for the ctxprompt retrieval
//! pipeline. This crate carries no I/O of its own: it defines the model that
//! the store, provider, and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Choosing a similarity store backend via configuration
//! - Testing the pipeline with scripted mock collaborators
//! - A clean dependency graph (all crates depend inward on core)

pub mod cancel;
pub mod embedding;
pub mod error;
pub mod history;
pub mod message;
pub mod provider;
pub mod run;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use embedding::{Embedding, Metadata, MetadataValue, ScoredEmbedding};
pub use error::{Error, ProviderError, Result, RunError, StoreError, ValidationError};
pub use history::{BoundedContext, Exchange, HistoryTurn, Retention};
pub use message::{Message, Role};
pub use provider::{CompletionOptions, CompletionProvider, EmbeddingProvider, TokenCounter};
pub use run::{RemoteRun, RunStatus, RunTransport, ThreadMessage};
pub use store::SimilarityStore;
