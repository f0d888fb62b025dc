//! Embedding domain types.
//!
//! An [`Embedding`] pairs a stable id with a dense vector and a small
//! metadata map. Metadata values are restricted to strings, numbers, and
//! booleans so they round-trip through any backend's opaque blob column
//! without type guessing at the call site.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StoreError;

/// Metadata key under which the source text of an embedding is kept.
pub const TEXT_KEY: &str = "text";

/// A metadata value of a known-safe scalar type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Ordered metadata map. `BTreeMap` keeps serialization deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Serialize metadata into the opaque JSON blob stored by persisted backends.
pub fn metadata_to_json(metadata: &Metadata) -> Result<String, StoreError> {
    serde_json::to_string(metadata).map_err(|e| StoreError::InvalidMetadata(e.to_string()))
}

/// Parse the opaque JSON blob back into metadata.
///
/// Nested objects, arrays, and nulls are rejected rather than coerced.
pub fn metadata_from_json(blob: &str) -> Result<Metadata, StoreError> {
    if blob.trim().is_empty() {
        return Ok(Metadata::new());
    }
    serde_json::from_str(blob).map_err(|e| StoreError::InvalidMetadata(e.to_string()))
}

/// A stored vector and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// Stable identity key. Re-adding an existing id overwrites the entry.
    pub id: String,

    /// The dense vector.
    pub vector: Vec<f32>,

    /// Scalar metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Embedding {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata value (builder style).
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// The text this embedding represents: the `"text"` metadata string when
    /// present, otherwise the id.
    pub fn text(&self) -> &str {
        self.metadata
            .get(TEXT_KEY)
            .and_then(MetadataValue::as_str)
            .unwrap_or(&self.id)
    }
}

/// An embedding returned by a search, with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEmbedding {
    pub embedding: Embedding,
    pub score: f32,
}
