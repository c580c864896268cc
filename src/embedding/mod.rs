//! Embedding capability consumed by the retrieval core.
//!
//! Embedding providers (local models, HTTP services) live outside the core;
//! the core consumes them through the [`Embedder`] trait. A deterministic
//! hash-based embedder is always available for tests and degraded operation.
//!
//! # Feature Flags
//!
//! - `fastembed-embeddings`: Enables `FastEmbed` with all-MiniLM-L6-v2 (384 dimensions)
//! - Without the feature: Uses the hash-based embedder (deterministic but not semantic)

mod codec;
mod fallback;

#[cfg(feature = "fastembed-embeddings")]
mod fastembed_impl;

pub use codec::{decode_embedding, encode_embedding};
pub use fallback::HashEmbedder;

#[cfg(feature = "fastembed-embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

use crate::Result;

/// Default embedding dimensions for the all-MiniLM-L6-v2 model.
///
/// This is the authoritative source for embedding dimensions across the
/// crate; stores opened without an explicit dimension adopt the first
/// written vector's length instead.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Capability that turns text into dense vectors.
///
/// Transport, retry, and rate-limit policies are provider concerns; the core
/// only calls these methods. Implementations must be thread-safe
/// (`Send + Sync`) so a single embedder can be shared across searchers.
///
/// # Examples
///
/// ```
/// use codeseek::embedding::{Embedder, HashEmbedder, DEFAULT_DIMENSIONS};
///
/// let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
/// let embedding = embedder.embed("fn main() {}").unwrap();
/// assert_eq!(embedding.len(), DEFAULT_DIMENSIONS);
/// ```
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    ///
    /// May be 0 until the first embedding has been produced; fixed
    /// thereafter.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts in one call.
    ///
    /// The default implementation calls `embed` for each text sequentially.
    /// Implementations backed by batch APIs should override this.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails for any text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Identifier of the underlying model, when the provider exposes one.
    ///
    /// Used to decide whether stored calibration metadata still applies.
    fn model(&self) -> Option<&str> {
        None
    }
}

/// Creates the default embedder for the enabled features.
///
/// # Errors
///
/// Returns an error if embedder initialization fails.
#[cfg(feature = "fastembed-embeddings")]
pub fn create_embedder() -> Result<Box<dyn Embedder>> {
    Ok(Box::new(FastEmbedEmbedder::new()?))
}

/// Creates the default embedder for the enabled features.
///
/// # Errors
///
/// Returns an error if embedder initialization fails (never fails for the
/// hash embedder).
#[cfg(not(feature = "fastembed-embeddings"))]
pub fn create_embedder() -> Result<Box<dyn Embedder>> {
    Ok(Box::new(HashEmbedder::new(DEFAULT_DIMENSIONS)))
}

/// Computes cosine similarity between two vectors.
///
/// Defined as `dot(a, b) / (|a| * |b|)`. Returns 0.0 when either vector has
/// zero norm or the lengths differ, so degenerate rows never poison a
/// ranking.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
