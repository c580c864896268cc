//! Result envelopes returned by the retrieval operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::Chunk;

/// Human-meaningful relevance label assigned by calibration or the
/// percentile fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Relevance {
    /// Not labelled (calibration missing and the result set was empty).
    #[default]
    #[serde(rename = "")]
    Unrated,
    /// At or above the high threshold / top 20%.
    #[serde(rename = "high")]
    High,
    /// At or above the medium threshold / next 50%.
    #[serde(rename = "medium")]
    Medium,
    /// At or above the low threshold / bottom 30%.
    #[serde(rename = "low")]
    Low,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matching chunk.
    pub chunk: Chunk,
    /// Similarity or fused score; higher is better.
    pub score: f32,
    /// Relevance label.
    #[serde(default)]
    pub relevance: Relevance,
    /// One-line preview: signature when present, else the first non-empty
    /// content line, truncated to 120 characters.
    #[serde(default)]
    pub preview: String,
}

impl SearchResult {
    /// Creates an unlabelled result.
    #[must_use]
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self {
            chunk,
            score,
            relevance: Relevance::Unrated,
            preview: String::new(),
        }
    }
}

/// A multisearch hit: a [`SearchResult`] annotated with the queries that
/// matched it and the boosted score used for ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedResult {
    /// The underlying hit, carrying the maximum raw score across queries.
    #[serde(flatten)]
    pub result: SearchResult,
    /// Queries that matched this chunk, in the caller's original order.
    pub matched_queries: Vec<String>,
    /// `min(1, raw + 0.05 * (matches - 1))` when boosting, else the raw score.
    pub boosted_score: f32,
}

/// Grouped multisearch output. The serialized shape keeps an explicit
/// `format` discriminant beside the populated field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum MultisearchOutput {
    /// Flat result list.
    Blended {
        /// Results ordered by boosted score.
        results: Vec<EnhancedResult>,
    },
    /// One group per original query; a result appears under every query it
    /// matched, and every query is present even when its group is empty.
    ByQuery {
        /// Query → ordered results.
        by_query: BTreeMap<String, Vec<EnhancedResult>>,
    },
    /// One group per result domain, `"default"` when a chunk has none.
    ByCollection {
        /// Domain → ordered results.
        by_collection: BTreeMap<String, Vec<EnhancedResult>>,
    },
}

/// Envelope returned by multisearch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultisearchResult {
    /// Grouped results.
    #[serde(flatten)]
    pub output: MultisearchOutput,
    /// Number of queries executed.
    pub total_queries: usize,
    /// Number of merged results (before grouping, after top-K).
    pub total_results: usize,
    /// Query → count of raw hits for that query.
    pub queries_matched: BTreeMap<String, usize>,
}

/// Store-level statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Total chunks persisted.
    pub chunks_total: usize,
    /// Distinct `file_path` count.
    pub files_indexed: usize,
    /// RFC3339 timestamp of the most recent write, empty when unknown.
    pub last_updated: String,
}

/// Report produced by [`IndexManager::index`](crate::index::IndexManager::index).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    /// Files read, chunked, and written this run.
    pub files_processed: usize,
    /// Files skipped because their content hash was unchanged.
    pub files_unchanged: usize,
    /// Files skipped because of per-file failures.
    pub files_skipped: usize,
    /// Chunks written this run.
    pub chunks_created: usize,
    /// Per-file failure messages; the walk continues past them.
    pub errors: Vec<String>,
}

/// Report produced by [`IndexManager::update`](crate::index::IndexManager::update).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Files re-indexed because their content changed.
    pub files_updated: usize,
    /// Previously indexed files no longer on disk.
    pub files_removed: usize,
    /// Chunks written this run.
    pub chunks_created: usize,
    /// Chunks deleted this run.
    pub chunks_removed: usize,
}

/// A memory-search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchResult {
    /// The matching entry.
    pub entry: crate::core::MemoryEntry,
    /// Cosine similarity against the query.
    pub score: f32,
}
