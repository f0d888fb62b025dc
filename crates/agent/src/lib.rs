//! The ctxprompt pipeline: context assembly, remote run orchestration, and
//! retrieval.
//!
//! A query flows through the [`Retriever`]:
//!
//! 1. **Embed** the query with the configured embedding provider
//! 2. **Retrieve** the top-K similar items from the similarity store
//! 3. **Bound** the conversation history by the token budget
//! 4. **Execute** through a chat completion or an assistant run
//! 5. **Normalize** the reply into a bounded [`Classification`]

pub mod classification;
pub mod context;
pub mod orchestrator;
pub mod retriever;
pub mod wiring;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use classification::{Classification, NormalizationPolicy};
pub use context::{AssemblerConfig, ContextAssembler, HeuristicTokenCounter, estimate_tokens};
pub use orchestrator::{RunHandle, RunOrchestrator, RunPolicy};
pub use retriever::{Answer, Executor, Retriever};
pub use wiring::build_retriever;
