//! Hash-based embedder.
//!
//! Produces deterministic pseudo-embeddings from word and trigram hashing.
//! Similarity reflects lexical overlap, not semantics; it keeps the engine
//! functional without a model and gives tests reproducible vectors.

use crate::Result;
use crate::embedding::Embedder;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic hash-based embedder.
///
/// Combines word-level hashing (vocabulary signal) with character trigram
/// hashing (fuzzy signal) and normalizes to unit length so cosine similarity
/// behaves.
///
/// # Examples
///
/// ```
/// use codeseek::embedding::{Embedder, HashEmbedder, DEFAULT_DIMENSIONS};
///
/// let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
/// let a = embedder.embed("parse config file").unwrap();
/// let b = embedder.embed("parse config file").unwrap();
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Creates a hash embedder with the given dimensions.
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
    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return embedding;
        }

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        for word in normalized.split_whitespace() {
            let hash = Self::hash_str(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        let chars: Vec<char> = normalized.chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let hash = Self::hash_str(&trigram);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
            embedding[idx] += sign;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        use rayon::prelude::*;

        Ok(texts.par_iter().map(|text| self.generate(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DEFAULT_DIMENSIONS, cosine_similarity};

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
        let a = embedder.embed("hello world").unwrap();
        let b = embedder.embed("hello world").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimensions() {
        let embedder = HashEmbedder::new(128);
        assert_eq!(embedder.embed("test").unwrap().len(), 128);
        assert_eq!(embedder.dimensions(), 128);
    }

    #[test]
    fn test_unit_norm() {
        let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
        let emb = embedder.embed("normalize me").unwrap();
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_self_similarity_is_one() {
        let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
        let emb = embedder.embed("fn parse(input: &str)").unwrap();
        assert!((cosine_similarity(&emb, &emb) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_overlapping_text_scores_higher() {
        let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
        let base = embedder.embed("the quick brown fox").unwrap();
        let near = embedder.embed("the quick brown dog").unwrap();
        let far = embedder.embed("completely unrelated text").unwrap();

        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_empty_text_zero_vector() {
        let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
        let emb = embedder.embed("").unwrap();
        assert!(emb.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_batch_matches_single() {
        let embedder = HashEmbedder::new(64);
        let batch = embedder.embed_batch(&["alpha", "beta"]).unwrap();
        assert_eq!(batch[0], embedder.embed("alpha").unwrap());
        assert_eq!(batch[1], embedder.embed("beta").unwrap());
    }

    #[test]
    fn test_no_model_name() {
        let embedder = HashEmbedder::new(64);
        assert!(embedder.model().is_none());
    }
}
