//! Option types recognized by the retrieval core.
//!
//! All option structs provide `Default` plus `with_*` builders. Validation
//! happens at the entry point of each operation and reports
//! [`Error::InvalidInput`](crate::Error::InvalidInput).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of queries accepted by a single multisearch call.
pub const MAX_MULTISEARCH_QUERIES: usize = 10;

/// Default RRF `k` parameter (value recommended by the original paper).
pub const DEFAULT_FUSION_K: usize = 60;

/// Recency boost configuration.
///
/// Scores are multiplied by `1 + factor * 2^(-age_days / half_life_days)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecencyConfig {
    /// Boost strength; 0 disables the boost.
    pub factor: f32,
    /// Age at which the boost halves, in days. Must be positive.
    pub half_life_days: f32,
}

impl RecencyConfig {
    /// Creates a recency config.
    #[must_use]
    pub const fn new(factor: f32, half_life_days: f32) -> Self {
        Self {
            factor,
            half_life_days,
        }
    }

    /// Validates `factor >= 0` and `half_life_days > 0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when out of range.
    pub fn validate(&self) -> Result<()> {
        if self.factor < 0.0 || !self.factor.is_finite() {
            return Err(Error::invalid_input("recency factor must be >= 0"));
        }
        if self.half_life_days <= 0.0 || !self.half_life_days.is_finite() {
            return Err(Error::invalid_input("recency half_life_days must be > 0"));
        }
        Ok(())
    }
}

/// Options for dense (and storage-level) search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum results to return; 0 means no truncation.
    #[serde(default)]
    pub top_k: usize,
    /// Drop results with raw score strictly below this, in [0, 1].
    #[serde(default)]
    pub threshold: f32,
    /// Exact-match filter on chunk type (empty = no filter).
    #[serde(default, rename = "type")]
    pub chunk_type: String,
    /// Prefix filter on `file_path` (empty = no filter).
    #[serde(default)]
    pub path_filter: String,
    /// Profiles to search; empty means the default profile.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Recency boost; absent means no boost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency: Option<RecencyConfig>,
}

impl SearchOptions {
    /// Creates options with defaults (unlimited, unfiltered).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the top-K limit.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Sets the score threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the chunk-type filter.
    #[must_use]
    pub fn with_chunk_type(mut self, chunk_type: impl Into<String>) -> Self {
        self.chunk_type = chunk_type.into();
        self
    }

    /// Sets the path-prefix filter.
    #[must_use]
    pub fn with_path_filter(mut self, path_filter: impl Into<String>) -> Self {
        self.path_filter = path_filter.into();
        self
    }

    /// Sets the profile list.
    #[must_use]
    pub fn with_profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Sets the recency boost.
    #[must_use]
    pub const fn with_recency(mut self, recency: RecencyConfig) -> Self {
        self.recency = Some(recency);
        self
    }

    /// Validates threshold range and recency config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a field is out of range.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::invalid_input(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        if let Some(recency) = &self.recency {
            recency.validate()?;
        }
        Ok(())
    }
}

/// Options for hybrid (dense + lexical) search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchOptions {
    /// Shared dense-search options.
    #[serde(flatten)]
    pub base: SearchOptions,
    /// RRF `k` parameter; 0 is rejected, callers usually keep
    /// [`DEFAULT_FUSION_K`].
    #[serde(default = "default_fusion_k")]
    pub fusion_k: usize,
    /// When present, use weighted fusion with this dense weight in [0, 1]
    /// instead of RRF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion_alpha: Option<f32>,
}

const fn default_fusion_k() -> usize {
    DEFAULT_FUSION_K
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridSearchOptions {
    /// Creates hybrid options with the default fusion `k`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: SearchOptions::default(),
            fusion_k: DEFAULT_FUSION_K,
            fusion_alpha: None,
        }
    }

    /// Sets the base search options.
    #[must_use]
    pub fn with_base(mut self, base: SearchOptions) -> Self {
        self.base = base;
        self
    }

    /// Sets the RRF `k` parameter.
    #[must_use]
    pub const fn with_fusion_k(mut self, fusion_k: usize) -> Self {
        self.fusion_k = fusion_k;
        self
    }

    /// Switches to weighted fusion with the given dense weight.
    #[must_use]
    pub const fn with_fusion_alpha(mut self, alpha: f32) -> Self {
        self.fusion_alpha = Some(alpha);
        self
    }

    /// Validates fusion parameters on top of the base options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a field is out of range.
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if self.fusion_k == 0 {
            return Err(Error::invalid_input("fusion_k must be >= 1"));
        }
        if let Some(alpha) = self.fusion_alpha
            && !(0.0..=1.0).contains(&alpha)
        {
            return Err(Error::invalid_input(format!(
                "fusion_alpha must be in [0, 1], got {alpha}"
            )));
        }
        Ok(())
    }
}

/// Output grouping for multisearch results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Single flat result list (the default).
    #[default]
    Blended,
    /// Grouped by originating query.
    ByQuery,
    /// Grouped by result domain/collection.
    ByCollection,
}

impl std::str::FromStr for OutputMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "blended" => Ok(Self::Blended),
            "by_query" => Ok(Self::ByQuery),
            "by_collection" => Ok(Self::ByCollection),
            other => Err(Error::invalid_input(format!(
                "output must be one of \"\", \"blended\", \"by_query\", \"by_collection\"; got {other:?}"
            ))),
        }
    }
}

/// Options for batched multi-query search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultisearchOptions {
    /// 1..=10 non-empty queries.
    pub queries: Vec<String>,
    /// Maximum results after merging; 0 means no truncation.
    #[serde(default)]
    pub top_k: usize,
    /// Raw-score threshold shared by all per-query searches.
    #[serde(default)]
    pub threshold: f32,
    /// Profiles to search; empty means the default profile.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Whether results matched by several queries get a score boost.
    #[serde(default = "default_true")]
    pub boost_multi_match: bool,
    /// Result grouping.
    #[serde(default)]
    pub output: OutputMode,
}

const fn default_true() -> bool {
    true
}

impl Default for MultisearchOptions {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MultisearchOptions {
    /// Creates multisearch options for the given queries, boosting enabled.
    #[must_use]
    pub fn new(queries: Vec<String>) -> Self {
        Self {
            queries,
            top_k: 0,
            threshold: 0.0,
            profiles: Vec::new(),
            boost_multi_match: true,
            output: OutputMode::Blended,
        }
    }

    /// Sets the top-K limit.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Sets the score threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the profile list.
    #[must_use]
    pub fn with_profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Enables or disables the multi-match boost.
    #[must_use]
    pub const fn with_boost_multi_match(mut self, boost: bool) -> Self {
        self.boost_multi_match = boost;
        self
    }

    /// Sets the output grouping.
    #[must_use]
    pub const fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Validates query count, query contents, and threshold range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a precondition fails.
    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(Error::invalid_input("multisearch requires at least one query"));
        }
        if self.queries.len() > MAX_MULTISEARCH_QUERIES {
            return Err(Error::invalid_input(format!(
                "multisearch accepts at most {MAX_MULTISEARCH_QUERIES} queries, got {}",
                self.queries.len()
            )));
        }
        if let Some(pos) = self.queries.iter().position(|q| q.trim().is_empty()) {
            return Err(Error::invalid_input(format!(
                "query {} is empty",
                pos + 1
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::invalid_input(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Filters for [`Storage::list`](crate::storage::Storage::list).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    /// Exact-match filter on `file_path`.
    pub file_path: Option<String>,
    /// Exact-match filter on chunk type.
    pub chunk_type: Option<String>,
    /// Exact-match filter on language.
    pub language: Option<String>,
    /// Maximum rows to return.
    pub limit: Option<usize>,
    /// Rows to skip before returning.
    pub offset: Option<usize>,
}

/// Filters for bounded-heap memory search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySearchOptions {
    /// Heap capacity; 0 falls back to the default of 10 (the heap must stay
    /// bounded for the streaming scan to hold its memory guarantee).
    pub top_k: usize,
    /// Drop entries scoring strictly below this.
    pub threshold: f32,
    /// Require at least one of these tags (empty = no filter).
    pub tags: Vec<String>,
    /// Exact-match filter on source (empty = no filter).
    pub source: String,
    /// Filter on status (None = no filter).
    pub status: Option<crate::core::MemoryStatus>,
}

/// Progress report delivered once per file during indexing.
#[derive(Debug, Clone)]
pub struct IndexProgress {
    /// 1-based position of this file in the accepted set.
    pub current: usize,
    /// Total accepted files.
    pub total: usize,
    /// Path of the file just handled.
    pub file_path: String,
    /// Chunks created so far across the whole run.
    pub chunks_total_so_far: usize,
    /// Whether the file was skipped as unchanged.
    pub skipped: bool,
}

/// Progress callback invoked once per file.
pub type ProgressFn = dyn Fn(&IndexProgress) + Send + Sync;

/// Options for directory indexing.
#[derive(Default)]
pub struct IndexOptions {
    /// Glob patterns a file must match to be indexed; empty accepts all.
    pub includes: Vec<String>,
    /// Directory names / path substrings and base-name globs to exclude.
    pub excludes: Vec<String>,
    /// Skip test files by language convention.
    pub exclude_tests: bool,
    /// Clear the store and re-index everything.
    pub force: bool,
    /// Embedding batch size; 0 embeds one batch per file.
    pub batch_size: usize,
    /// Parallel embed shards per file; <= 1 is sequential.
    pub parallel: usize,
    /// Progress callback.
    pub on_progress: Option<Box<ProgressFn>>,
}

impl std::fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOptions")
            .field("includes", &self.includes)
            .field("excludes", &self.excludes)
            .field("exclude_tests", &self.exclude_tests)
            .field("force", &self.force)
            .field("batch_size", &self.batch_size)
            .field("parallel", &self.parallel)
            .field("on_progress", &self.on_progress.as_ref().map(|_| "..."))
            .finish()
    }
}
