//! Embedding generation port.
//!
//! The embedding model is an external collaborator; the core talks to it
//! through the [`Embedder`] trait. The in-tree [`FallbackEmbedder`] is a
//! deterministic hash-based implementation used by the CLI and tests —
//! not semantic, but dimension-correct and stable across runs.

mod fallback;

pub use fallback::FallbackEmbedder;

use crate::Result;

/// Trait for embedding generators.
///
/// Implementations must be thread-safe (`Send + Sync`); ingestion embeds
/// batches from parallel workers. All vectors must share one dimension.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimension.
    fn dimensions(&self) -> usize;

    /// Generates embeddings for a batch of texts, one vector per input,
    /// in input order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EmbedError`] variants; `Transient` and
    /// `RateLimited` are retried by the ingestion coordinator.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    ///
    /// # Errors
    ///
    /// Same as [`Self::embed`].
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text])?;
        Ok(vectors.pop().unwrap_or_default())
    }
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value between -1.0 (opposite) and 1.0 (identical). Returns
/// 0.0 for mismatched lengths or zero-magnitude vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EMBEDDING_DIM;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_embed_one_matches_batch() {
        let embedder = FallbackEmbedder::new(DEFAULT_EMBEDDING_DIM);
        let single = embedder.embed_one("民法典").unwrap();
        let batch = embedder.embed(&["民法典"]).unwrap();
        assert_eq!(single, batch[0]);
    }
}
