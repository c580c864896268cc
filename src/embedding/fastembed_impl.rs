//! `FastEmbed`-based semantic embedder.
//!
//! Real semantic embeddings via the all-MiniLM-L6-v2 model through
//! fastembed-rs. Only available with the `fastembed-embeddings` feature.

use crate::error::Error;
use crate::Result;
use crate::embedding::{DEFAULT_DIMENSIONS, Embedder};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::OnceLock;

/// Process-wide model singleton; loaded lazily on first embed call to keep
/// cold starts cheap.
static EMBEDDING_MODEL: OnceLock<std::sync::Mutex<fastembed::TextEmbedding>> = OnceLock::new();

/// `FastEmbed` embedder using all-MiniLM-L6-v2.
pub struct FastEmbedEmbedder {
    model_name: &'static str,
}

impl FastEmbedEmbedder {
    /// Creates a new `FastEmbed` embedder. The model itself loads lazily on
    /// the first `embed()` call.
    ///
    /// # Errors
    ///
    /// Returns an error if embedder initialization fails.
    #[allow(clippy::missing_const_for_fn)]
    pub fn new() -> Result<Self> {
        Ok(Self {
            model_name: "all-MiniLM-L6-v2",
        })
    }

    /// Gets or initializes the shared model.
    fn get_model() -> Result<&'static std::sync::Mutex<fastembed::TextEmbedding>> {
        if let Some(model) = EMBEDDING_MODEL.get() {
            return Ok(model);
        }

        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false);

        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| Error::Embedding(format!("failed to load embedding model: {e}")))?;

        // Another thread may have won the race; either instance is fine.
        let _ = EMBEDDING_MODEL.set(std::sync::Mutex::new(model));

        EMBEDDING_MODEL
            .get()
            .ok_or_else(|| Error::Embedding("model initialization race".to_string()))
    }

    fn run_model(texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let model = Self::get_model()?;
        let mut model = model
            .lock()
            .map_err(|e| Error::Embedding(format!("failed to lock embedding model: {e}")))?;

        // The ONNX runtime can panic on malformed inputs; contain it.
        let result = catch_unwind(AssertUnwindSafe(|| model.embed(texts.to_vec(), None)));

        result
            .map_err(|panic_info| {
                let panic_msg = panic_info
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic_info.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Error::Embedding(format!("ONNX runtime panic: {panic_msg}"))
            })?
            .map_err(|e| Error::Embedding(format!("embedding failed: {e}")))
    }
}

impl Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(Error::Embedding("cannot embed empty text".to_string()));
        }

        Self::run_model(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no embedding returned from model".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(Error::Embedding("cannot embed empty text".to_string()));
        }

        Self::run_model(texts)
    }

    fn model(&self) -> Option<&str> {
        Some(self.model_name)
    }
}
