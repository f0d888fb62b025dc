//! Error types for the ctxprompt domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] wraps them all.

use thiserror::Error;

use crate::run::RunStatus;

/// The top-level error type for all ctxprompt operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Similarity store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Remote run errors ---
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    // --- Input validation ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Final answer parsing ---
    #[error("Failed to parse model output ({reason}): {raw}")]
    Parse { raw: String, reason: String },

    #[error("Operation cancelled by caller")]
    Cancelled,

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Transport and provider failures. Every transport variant names the
/// endpoint that failed so callers can tell which hop broke.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request to {endpoint} failed: {message} (status: {status_code})")]
    ApiError {
        endpoint: String,
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by {endpoint}, retry after {retry_after_secs}s")]
    RateLimited {
        endpoint: String,
        retry_after_secs: u64,
    },

    #[error("Authentication failed at {endpoint}: {message}")]
    AuthenticationFailed { endpoint: String, message: String },

    #[error("Network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Dimension mismatch: store holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Run ended with status {status}")]
    TerminatedAbnormally { status: RunStatus },

    #[error("Run {run_id} on thread {thread_id} did not finish within {waited_ms}ms")]
    Timeout {
        thread_id: String,
        run_id: String,
        waited_ms: u64,
    },

    #[error("No assistant response found in thread {thread_id}")]
    NoAssistantResponse { thread_id: String },

    #[error("Illegal run transition: {from} -> {to}")]
    IllegalTransition { from: RunStatus, to: RunStatus },

    #[error("Run transport failed: {0}")]
    Transport(#[from] ProviderError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("At least one non-empty query text is required")]
    EmptyInput,

    #[error("Invalid token budget: {0}")]
    InvalidBudget(String),

    #[error("Embedding vector must not be empty")]
    EmptyVector,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
