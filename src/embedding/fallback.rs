//! Hash-based fallback embedder.
//!
//! Deterministic pseudo-embeddings based on lexical overlap, not
//! semantics. For Chinese-dominant legal text the signal comes from
//! character unigrams and bigrams; whitespace-delimited tokens add a
//! word-level signal for Latin text.

use crate::Result;
use crate::embedding::Embedder;
use rayon::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash-based fallback embedder.
///
/// Vectors are reproducible across runs and normalized to unit length so
/// cosine similarity behaves. Texts sharing characters and bigrams land
/// near each other; unrelated texts do not.
///
/// # Examples
///
/// ```
/// use lexrag::embedding::{Embedder, FallbackEmbedder};
///
/// let embedder = FallbackEmbedder::new(768);
/// let a = embedder.embed_one("民法典第一条").unwrap();
/// let b = embedder.embed_one("民法典第一条").unwrap();
/// assert_eq!(a, b);
/// ```
pub struct FallbackEmbedder {
    dimensions: usize,
}

impl FallbackEmbedder {
    /// Creates a fallback embedder with the given dimension.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_str(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn bump(&self, embedding: &mut [f32], token: &str, weight: f32) {
        let hash = Self::hash_str(token);
        let idx = (hash as usize) % self.dimensions;
        let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
        embedding[idx] += sign * magnitude * weight;
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        // Word signal for whitespace-delimited scripts.
        for word in text.split_whitespace() {
            self.bump(&mut embedding, &word.to_lowercase(), 1.0);
        }

        // Character unigrams and bigrams carry the CJK signal.
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        let mut buf = String::new();
        for c in &chars {
            buf.clear();
            buf.push(*c);
            self.bump(&mut embedding, &buf, 0.7);
        }
        for pair in chars.windows(2) {
            buf.clear();
            buf.extend(pair);
            self.bump(&mut embedding, &buf, 0.9);
        }

        // Unit length for cosine similarity.
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }

        embedding
    }
}

impl Embedder for FallbackEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.par_iter().map(|text| self.generate(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = FallbackEmbedder::new(256);
        let a = embedder.embed_one("环境保护法第三十条").unwrap();
        let b = embedder.embed_one("环境保护法第三十条").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimension_respected() {
        for dim in [64, 384, 768] {
            let embedder = FallbackEmbedder::new(dim);
            assert_eq!(embedder.dimensions(), dim);
            assert_eq!(embedder.embed_one("text").unwrap().len(), dim);
        }
    }

    #[test]
    fn test_unit_length() {
        let embedder = FallbackEmbedder::new(384);
        let v = embedder.embed_one("民事主体的合法权益受法律保护").unwrap();
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_overlapping_text_scores_higher() {
        let embedder = FallbackEmbedder::new(768);
        let base = embedder.embed_one("民法典第一千一百九十八条 安全保障义务").unwrap();
        let near = embedder.embed_one("民法典第一千一百九十八条").unwrap();
        let far = embedder.embed_one("weather report for tuesday").unwrap();

        let sim_near = cosine_similarity(&base, &near);
        let sim_far = cosine_similarity(&base, &far);
        assert!(
            sim_near > sim_far,
            "lexical overlap should rank higher: {sim_near} vs {sim_far}"
        );
    }

    #[test]
    fn test_batch_order_preserved() {
        let embedder = FallbackEmbedder::new(128);
        let texts = vec!["第一条", "第二条", "第三条"];
        let batch = embedder.embed(&texts).unwrap();
        assert_eq!(batch.len(), 3);
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(vector, &embedder.embed_one(text).unwrap());
        }
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = FallbackEmbedder::new(64);
        let v = embedder.embed_one("").unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }
}
