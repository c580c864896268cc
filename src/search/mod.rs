//! Retrieval engine: dense, hybrid, batched, and multi-profile search.

mod fusion;
mod label;
mod multi;
mod profiles;
mod recency;

pub use fusion::{fuse_rrf, fuse_weighted};
pub use label::{absolute_label, enrich_results, make_preview};
pub use profiles::MultiProfileSearcher;
pub use recency::apply_recency_boost;

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::core::{
    HybridSearchOptions, MultisearchOptions, MultisearchResult, SearchOptions, SearchResult,
};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::storage::Storage;

#[allow(clippy::cast_possible_wrap)]
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Single-profile query path: dense search, hybrid search, and batched
/// multisearch against one store.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use codeseek::{CancelToken, Searcher, SearchOptions};
/// use codeseek::embedding::{HashEmbedder, DEFAULT_DIMENSIONS};
/// use codeseek::storage::SqliteStore;
///
/// let store = Arc::new(SqliteStore::open("index.db").unwrap());
/// let embedder = Arc::new(HashEmbedder::new(DEFAULT_DIMENSIONS));
/// let searcher = Searcher::new(store, embedder);
/// let hits = searcher
///     .search("parse config", &SearchOptions::new().with_top_k(5), &CancelToken::new())
///     .unwrap();
/// ```
pub struct Searcher {
    store: Arc<dyn Storage>,
    embedder: Arc<dyn Embedder>,
}

impl Searcher {
    /// Creates a searcher over a store and an embedding provider.
    #[must_use]
    pub fn new(store: Arc<dyn Storage>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    /// The embedding provider.
    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    fn require_query(query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Err(Error::invalid_input("query must not be empty"));
        }
        Ok(())
    }

    /// Dense-only search.
    ///
    /// The store applies the threshold to raw cosine scores; the recency
    /// boost (when configured) runs afterwards, followed by calibration
    /// labels and previews.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty query or out-of-range options; embedder
    /// and store failures propagate.
    pub fn search(
        &self,
        query: &str,
        options: &SearchOptions,
        token: &CancelToken,
    ) -> Result<Vec<SearchResult>> {
        Self::require_query(query)?;
        options.validate()?;

        let embedding = self.embedder.embed(query)?;
        let mut results = self.store.search(&embedding, options, token)?;

        if let Some(recency) = &options.recency {
            apply_recency_boost(&mut results, recency, unix_now());
            results.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        self.enrich(&mut results)?;
        Ok(results)
    }

    /// Hybrid dense + lexical search.
    ///
    /// Both branches are oversampled to `max(top_k, fusion_k)` to give the
    /// fusion room; `fusion_alpha` selects weighted fusion, otherwise RRF
    /// with `fusion_k` applies. The recency boost runs before the threshold
    /// filter here because fused scores are only comparable after boosting.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty query or out-of-range options;
    /// `LexicalSyntax` for malformed full-text queries; embedder and store
    /// failures propagate.
    pub fn hybrid_search(
        &self,
        query: &str,
        options: &HybridSearchOptions,
        token: &CancelToken,
    ) -> Result<Vec<SearchResult>> {
        Self::require_query(query)?;
        options.validate()?;

        let embedding = self.embedder.embed(query)?;

        // top_k = 0 means unlimited, which already gives fusion everything.
        let oversample = if options.base.top_k == 0 {
            0
        } else {
            options.base.top_k.max(options.fusion_k)
        };
        let branch_options = SearchOptions {
            top_k: oversample,
            threshold: 0.0,
            chunk_type: options.base.chunk_type.clone(),
            path_filter: options.base.path_filter.clone(),
            profiles: Vec::new(),
            recency: None,
        };

        let dense = self.store.search(&embedding, &branch_options, token)?;
        let lexical = self.store.search_lexical(query, &branch_options)?;

        let mut results = match options.fusion_alpha {
            Some(alpha) => fuse_weighted(&dense, &lexical, alpha)?,
            None => fuse_rrf(&dense, &lexical, options.fusion_k)?,
        };

        if let Some(recency) = &options.base.recency {
            apply_recency_boost(&mut results, recency, unix_now());
            results.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        if options.base.threshold > 0.0 {
            results.retain(|r| r.score >= options.base.threshold);
        }
        if options.base.top_k > 0 {
            results.truncate(options.base.top_k);
        }

        self.enrich(&mut results)?;
        Ok(results)
    }

    /// Batched multi-query search against this searcher's store.
    ///
    /// Per-query searches run unlimited (`top_k = 0`) with the shared
    /// threshold; merging, boosting, ordering, and grouping follow the
    /// multisearch contract. Profile routing belongs to
    /// [`MultiProfileSearcher::multisearch`].
    ///
    /// # Errors
    ///
    /// `InvalidInput` for bad options; per-query failures are aggregated
    /// and fail the call.
    pub fn multisearch(
        &self,
        options: &MultisearchOptions,
        token: &CancelToken,
    ) -> Result<MultisearchResult> {
        let calibration = self.store.get_calibration_metadata()?;
        let per_query = SearchOptions::new().with_threshold(options.threshold);

        multi::run_multisearch(
            options,
            self.embedder.as_ref(),
            calibration.as_ref(),
            token,
            |_, embedding| self.store.search(embedding, &per_query, token),
        )
    }

    fn enrich(&self, results: &mut [SearchResult]) -> Result<()> {
        let calibration = self.store.get_calibration_metadata()?;
        enrich_results(results, calibration.as_ref(), self.embedder.model());
        Ok(())
    }
}
