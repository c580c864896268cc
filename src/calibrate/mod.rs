//! Calibration runner.
//!
//! One-off procedure that samples the index to estimate what "perfect" and
//! "baseline" similarity scores look like for the active embedding model,
//! then stores absolute relevance thresholds derived from the spread.

use std::sync::Arc;

use tracing::debug;

use crate::cancel::CancelToken;
use crate::core::{CalibrationMetadata, Chunk, ListOptions, SearchOptions, median};
use crate::embedding::{Embedder, cosine_similarity};
use crate::error::{Error, Result};
use crate::storage::Storage;

/// Maximum chunks sampled for the perfect-match estimate.
const MAX_SAMPLES: usize = 32;

/// Estimates and persists [`CalibrationMetadata`] for a store.
pub struct CalibrationRunner {
    store: Arc<dyn Storage>,
    embedder: Arc<dyn Embedder>,
}

impl CalibrationRunner {
    /// Creates a calibration runner.
    #[must_use]
    pub fn new(store: Arc<dyn Storage>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Runs calibration and stores the resulting record.
    ///
    /// Perfect-match: up to [`MAX_SAMPLES`] chunks taken at an even stride
    /// over the id-ordered listing are re-embedded from their own content
    /// and searched for themselves; the median top-1 score is the perfect
    /// score. Baseline: disjoint pairs of the sampled chunks' stored
    /// embeddings; the median pairwise similarity is the baseline. Sampling
    /// is deterministic so calibration is reproducible.
    ///
    /// # Errors
    ///
    /// `EmptyIndex` when the store has no chunks (nothing is written);
    /// `Cancelled` when the token trips; embedder and store failures
    /// propagate.
    pub fn run(&self, token: &CancelToken) -> Result<CalibrationMetadata> {
        let total = self.store.stats()?.chunks_total;
        if total == 0 {
            return Err(Error::EmptyIndex);
        }

        let samples = self.sample_chunks(total, token)?;

        let mut top_scores: Vec<f32> = Vec::with_capacity(samples.len());
        let search_options = SearchOptions::new().with_top_k(1);
        for chunk in &samples {
            token.check("calibration")?;
            let embedding = self.embedder.embed(&chunk.content)?;
            let hits = self.store.search(&embedding, &search_options, token)?;
            if let Some(top) = hits.first() {
                top_scores.push(top.score);
            }
        }

        let baseline_scores = self.baseline_pairs(&samples, token)?;

        let perfect = median(&top_scores).unwrap_or(0.0);
        let baseline = median(&baseline_scores).unwrap_or(0.0);
        debug!(
            samples = samples.len(),
            perfect, baseline, "calibration estimates"
        );

        let meta = CalibrationMetadata::derive(
            self.embedder.model().unwrap_or_default(),
            chrono::Utc::now().to_rfc3339(),
            perfect,
            baseline,
        );
        self.store.set_calibration_metadata(&meta)?;
        Ok(meta)
    }

    /// Takes up to [`MAX_SAMPLES`] chunks at an even stride over the
    /// id-ordered listing.
    fn sample_chunks(&self, total: usize, token: &CancelToken) -> Result<Vec<Chunk>> {
        let sample_count = total.min(MAX_SAMPLES);
        let stride = (total / sample_count).max(1);

        let mut samples = Vec::with_capacity(sample_count);
        for index in 0..sample_count {
            token.check("calibration sampling")?;
            let page = self.store.list(&ListOptions {
                limit: Some(1),
                offset: Some(index * stride),
                ..Default::default()
            })?;
            if let Some(chunk) = page.into_iter().next() {
                samples.push(chunk);
            }
        }
        Ok(samples)
    }

    /// Pairwise similarities of disjoint sample pairs `(i, i + n/2)`.
    fn baseline_pairs(&self, samples: &[Chunk], token: &CancelToken) -> Result<Vec<f32>> {
        let half = samples.len() / 2;
        let mut scores = Vec::with_capacity(half);
        for index in 0..half {
            token.check("calibration baseline")?;
            let a = &samples[index];
            let b = &samples[index + half];
            if a.id == b.id {
                continue;
            }
            let embedding_a = self.store.read_embedding(&a.id)?;
            let embedding_b = self.store.read_embedding(&b.id)?;
            scores.push(cosine_similarity(&embedding_a, &embedding_b));
        }
        Ok(scores)
    }
}
