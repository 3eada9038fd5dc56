//! Embedding provider boundary.
//!
//! The engine never loads a model itself — an [`EmbeddingProvider`] is injected
//! at construction time, which keeps the graph testable with deterministic
//! doubles and leaves the choice of backend (local model, remote API) to the
//! host application.

use crate::error::EmbedError;

/// A black-box text-to-vector function.
///
/// Implementations must be deterministic for a given input within one process
/// lifetime: the graph compares embeddings produced at different times.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text` into a fixed-length vector.
    ///
    /// Must return [`EmbedError::EmptyText`] for empty or whitespace-only
    /// input rather than a degenerate vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Cosine similarity between two embeddings.
///
/// Returns an error on dimension mismatch; returns 0.0 when either vector has
/// zero norm (nothing meaningful to compare).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, EmbedError> {
    if a.len() != b.len() {
        return Err(EmbedError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
