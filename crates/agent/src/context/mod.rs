//! Token-bounded context assembly.
//!
//! Turns prior user/assistant exchanges into a [`BoundedContext`] whose
//! charged tokens never exceed `budget * safety_factor`.
//!
//! [`BoundedContext`]: ctxprompt_core::history::BoundedContext

pub mod assembler;
pub mod token;

pub use assembler::{AssemblerConfig, ContextAssembler};
pub use token::{HeuristicTokenCounter, estimate_tokens};
