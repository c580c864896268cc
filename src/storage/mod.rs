//! Chunk/embedding persistence.
//!
//! Defines the [`Storage`] capability the retrieval engine runs against and
//! the SQLite implementation with its co-located lexical index. External
//! vector backends implement the same trait and pair it with an
//! [`FtsMirror`] sibling lexical index.

mod fts_mirror;
mod schema;
mod sqlite;

pub use fts_mirror::{FtsMirror, default_mirror_path, sanitize_collection};
pub use schema::{FTS_BACKFILL_SQL, FTS_SQL, SCHEMA_SQL, migrate};
pub use sqlite::SqliteStore;

use crate::cancel::CancelToken;
use crate::core::{
    CalibrationMetadata, Chunk, ListOptions, MemoryEntry, MemorySearchOptions, MemorySearchResult,
    SearchOptions, SearchResult, StoreStats,
};
use crate::error::Result;

/// Capability for persisting and querying `(Chunk, Embedding)` pairs.
///
/// A single store instance is safe for concurrent readers; writers take an
/// exclusive lock internally. A write that has returned success is visible
/// to every subsequent read on the same store, and the lexical index
/// reflects the change as part of the same logical write.
pub trait Storage: Send + Sync {
    /// Persists a chunk with its embedding.
    ///
    /// Replaces any existing chunk with the same id. After success the
    /// lexical index contains exactly one entry for the chunk.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the embedding length mismatches the configured
    /// dimension or a chunk invariant is violated.
    fn create(&self, chunk: &Chunk, embedding: &[f32]) -> Result<()>;

    /// Persists a batch atomically: either all items are written or none.
    ///
    /// One transaction, one prepared statement.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Storage::create`]; any failure rolls back the
    /// whole batch.
    fn create_batch(&self, items: &[(Chunk, Vec<f32>)]) -> Result<()>;

    /// Reads a chunk by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is absent.
    fn read(&self, id: &str) -> Result<Chunk>;

    /// Replaces the chunk stored under `id` and bumps `updated_at`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is absent; `InvalidInput` on dimension or
    /// invariant violations.
    fn update(&self, id: &str, chunk: &Chunk, embedding: &[f32]) -> Result<()>;

    /// Deletes a chunk by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is absent.
    fn delete(&self, id: &str) -> Result<()>;

    /// Deletes all chunks for a file path, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_by_file_path(&self, file_path: &str) -> Result<usize>;

    /// Deletes all chunks in a domain, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_by_domain(&self, domain: &str) -> Result<usize>;

    /// Lists chunks ordered by `(file_path ASC, start_line ASC)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list(&self, options: &ListOptions) -> Result<Vec<Chunk>>;

    /// Brute-force cosine search over all stored embeddings.
    ///
    /// Results come back sorted by score descending, filtered by type,
    /// path prefix, and threshold, truncated to `top_k` (0 = no
    /// truncation). Rows whose embeddings cannot be decoded or whose
    /// dimensions mismatch the query are skipped with a debug log.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the token trips mid-scan, or a storage
    /// error.
    fn search(
        &self,
        query_embedding: &[f32],
        options: &SearchOptions,
        token: &CancelToken,
    ) -> Result<Vec<SearchResult>>;

    /// BM25 lexical search over `(name, content)`.
    ///
    /// Scores are `-bm25`, so higher is better. An empty query returns an
    /// empty list.
    ///
    /// # Errors
    ///
    /// `LexicalSyntax` for malformed full-text queries.
    fn search_lexical(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>>;

    /// Reads the stored embedding for a chunk.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is absent, `InvalidEmbedding` when the stored
    /// bytes cannot be decoded.
    fn read_embedding(&self, id: &str) -> Result<Vec<f32>>;

    /// Store-level statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the queries fail.
    fn stats(&self) -> Result<StoreStats>;

    /// Truncates chunks, lexical entries, and file hashes.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails.
    fn clear(&self) -> Result<()>;

    /// Reads the recorded content hash for a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_file_hash(&self, file_path: &str) -> Result<Option<String>>;

    /// Upserts the content hash for a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set_file_hash(&self, file_path: &str, content_hash: &str) -> Result<()>;

    /// Forgets the content hash for a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_file_hash(&self, file_path: &str) -> Result<()>;

    /// Lists every file path with a recorded content hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_file_hashes(&self) -> Result<Vec<String>>;

    /// Reads the calibration singleton.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or deserialization fails.
    fn get_calibration_metadata(&self) -> Result<Option<CalibrationMetadata>>;

    /// Writes the calibration singleton.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    fn set_calibration_metadata(&self, meta: &CalibrationMetadata) -> Result<()>;

    /// Upserts a memory entry with its embedding. Re-saving an existing id
    /// bumps its occurrence count and `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn save_memory(&self, entry: &MemoryEntry, embedding: &[f32]) -> Result<()>;

    /// Reads a memory entry by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is absent.
    fn get_memory(&self, id: &str) -> Result<MemoryEntry>;

    /// Deletes a memory entry by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is absent.
    fn delete_memory(&self, id: &str) -> Result<()>;

    /// Bounded-heap top-K search over memory entries.
    ///
    /// Iterates id-ordered pages of 1000 entries, applies filters eagerly
    /// (threshold, tags, source, status), and keeps a min-heap of the
    /// caller's `top_k` (default 10). Peak memory is O(page + `top_k`)
    /// regardless of store size.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` when the token trips between pages, or a
    /// storage error.
    fn search_memory(
        &self,
        query_embedding: &[f32],
        options: &MemorySearchOptions,
        token: &CancelToken,
    ) -> Result<Vec<MemorySearchResult>>;
}
