//! Core data model: chunks, options, results, calibration.

mod calibration;
mod chunk;
mod options;
mod results;

pub use calibration::{CalibrationMetadata, median};
pub use chunk::{Chunk, ChunkType, DEFAULT_DOMAIN, MemoryEntry, MemoryStatus, derive_chunk_id};
pub use options::{
    DEFAULT_FUSION_K, HybridSearchOptions, IndexOptions, IndexProgress, ListOptions,
    MAX_MULTISEARCH_QUERIES, MemorySearchOptions, MultisearchOptions, OutputMode, ProgressFn,
    RecencyConfig, SearchOptions,
};
pub use results::{
    EnhancedResult, IndexResult, MemorySearchResult, MultisearchOutput, MultisearchResult,
    Relevance, SearchResult, StoreStats, UpdateResult,
};
