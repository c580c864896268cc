//! # codeseek
//!
//! Hybrid code search core: finds relevant source-code or documentation
//! fragments by combining dense semantic (vector) similarity with sparse
//! lexical (BM25) matching.
//!
//! ## Features
//!
//! - **Hybrid retrieval**: brute-force cosine search plus FTS5 BM25, fused
//!   with Reciprocal Rank Fusion or a linear weighted blend
//! - **Multisearch**: up to ten queries embedded in one batch, fanned out
//!   concurrently, deduplicated with multi-match score boosting
//! - **Multi-profile fan-out**: parallel search across storage profiles
//!   (e.g. `code`, `docs`) with partial-failure tolerance
//! - **Incremental indexing**: SHA-256 content-hash resume, per-file
//!   progress reporting, bounded parallel embedding
//! - **Score calibration**: converts raw cosine similarities into
//!   `high`/`medium`/`low` relevance labels
//! - **`SQLite` storage**: WAL-journaled chunk store with a trigger-synced
//!   lexical index, or a sibling mirror for external vector backends

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod calibrate;
mod cancel;
pub mod chunking;
pub mod core;
pub mod embedding;
pub mod error;
pub mod index;
pub mod search;
pub mod storage;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorKind, Result};

pub use cancel::CancelToken;

// Re-export core domain types
pub use self::core::{
    CalibrationMetadata, Chunk, ChunkType, EnhancedResult, HybridSearchOptions, IndexOptions,
    IndexProgress, IndexResult, ListOptions, MemoryEntry, MemorySearchOptions, MemoryStatus,
    MultisearchOptions, MultisearchOutput, MultisearchResult, OutputMode, RecencyConfig,
    Relevance, SearchOptions, SearchResult, StoreStats, UpdateResult, derive_chunk_id,
};

// Re-export storage types
pub use storage::{FtsMirror, SqliteStore, Storage};

// Re-export chunking types
pub use chunking::{BlockChunker, Chunker, ChunkerRegistry};

// Re-export embedding types
#[cfg(feature = "fastembed-embeddings")]
pub use embedding::FastEmbedEmbedder;
pub use embedding::{
    DEFAULT_DIMENSIONS, Embedder, HashEmbedder, cosine_similarity, create_embedder,
};

// Re-export search types
pub use search::{
    MultiProfileSearcher, Searcher, apply_recency_boost, fuse_rrf, fuse_weighted,
};

// Re-export indexing and calibration entry points
pub use calibrate::CalibrationRunner;
pub use index::IndexManager;
