//! Vector similarity and exact top-K ranking.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity
//! - Full-scan ranking with a stable insertion-order tie-break

use ctxprompt_core::embedding::{Embedding, ScoredEmbedding};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector has zero norm, is empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank `(sequence, embedding)` pairs by cosine similarity to `query`.
///
/// Every entry is scored, then sorted by descending similarity. Equal scores
/// keep ascending `sequence` order, so results are deterministic for a given
/// insertion history. Returns at most `k` results.
pub fn rank<'a>(
    entries: impl IntoIterator<Item = (u64, &'a Embedding)>,
    query: &[f32],
    k: usize,
) -> Vec<ScoredEmbedding> {
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(u64, f32, &Embedding)> = entries
        .into_iter()
        .map(|(seq, e)| (seq, cosine_similarity(&e.vector, query), e))
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(_, score, e)| ScoredEmbedding {
            embedding: e.clone(),
            score,
        })
        .collect()
}
