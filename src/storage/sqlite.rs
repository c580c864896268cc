//! `SQLite` chunk store.
//!
//! Persists `(Chunk, Embedding)` pairs with a co-located FTS5 lexical index
//! kept in sync by triggers. Dense search is brute-force cosine over the
//! embedding column; WAL journaling is enabled for file-backed stores.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit in the target types.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::core::{
    CalibrationMetadata, Chunk, ChunkType, ListOptions, MemoryEntry, MemorySearchOptions,
    MemorySearchResult, MemoryStatus, SearchOptions, SearchResult, StoreStats,
};
use crate::embedding::{cosine_similarity, decode_embedding, encode_embedding};
use crate::error::{Error, Result};
use crate::storage::{Storage, schema};

/// Metadata key holding the adopted embedding dimension.
const DIMENSION_KEY: &str = "embedding_dim";

/// Metadata key holding the calibration record.
const CALIBRATION_KEY: &str = "calibration";

/// Page size for the streaming memory scan.
const MEMORY_PAGE_SIZE: usize = 1000;

/// Default heap capacity for memory search when the caller passes 0.
const MEMORY_DEFAULT_TOP_K: usize = 10;

/// Columns selected for chunk reads, in row-mapping order.
const CHUNK_COLUMNS: &str = "id, file_path, chunk_type, name, signature, content, \
     start_line, end_line, language, domain, file_mtime";

struct Inner {
    conn: Connection,
    /// Configured embedding dimension; 0 until the first write adopts one.
    dim: usize,
}

/// SQLite-backed [`Storage`] implementation.
///
/// A single instance is shared across threads; the connection sits behind an
/// exclusive lock held only for the duration of each operation, so a write
/// that has returned is visible to every subsequent read.
///
/// # Examples
///
/// ```no_run
/// use codeseek::storage::{SqliteStore, Storage};
///
/// let store = SqliteStore::open("index.db").unwrap();
/// let stats = store.stats().unwrap();
/// println!("{} chunks indexed", stats.chunks_total);
/// ```
pub struct SqliteStore {
    inner: Mutex<Option<Inner>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens or creates a store at the given path, running migrations.
    ///
    /// The embedding dimension is adopted from stored metadata, or from the
    /// first written embedding on a fresh database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_dimension(path, 0)
    }

    /// Opens or creates a store with an explicit embedding dimension.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the requested dimension conflicts with
    /// one already recorded in the database.
    pub fn open_with_dimension<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        // WAL mode for better concurrent access (returns a row, use query_row)
        let _: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;

        Self::finish_open(conn, Some(path), dimension)
    }

    /// Creates an in-memory store. Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_dimension(0)
    }

    /// Creates an in-memory store with an explicit embedding dimension.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory_with_dimension(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        Self::finish_open(conn, None, dimension)
    }

    fn finish_open(conn: Connection, path: Option<PathBuf>, dimension: usize) -> Result<Self> {
        schema::migrate(&conn)?;

        let stored_dim: Option<usize> = conn
            .query_row(
                "SELECT value FROM index_metadata WHERE key = ?",
                [DIMENSION_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|v| v.parse().ok());

        let dim = match (stored_dim.unwrap_or(0), dimension) {
            (0, requested) => requested,
            (stored, 0) => stored,
            (stored, requested) if stored == requested => stored,
            (stored, requested) => {
                return Err(Error::invalid_input(format!(
                    "store was created with dimension {stored}, cannot reopen with {requested}"
                )));
            }
        };

        Ok(Self {
            inner: Mutex::new(Some(Inner { conn, dim })),
            path,
        })
    }

    /// Returns the database path (None for in-memory stores).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the configured embedding dimension (0 until adopted).
    ///
    /// # Errors
    ///
    /// Returns `StorageClosed` after [`SqliteStore::close`].
    pub fn dimension(&self) -> Result<usize> {
        self.with_inner(|inner| Ok(inner.dim))
    }

    /// Closes the store. Subsequent operations fail with `StorageClosed`.
    pub fn close(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = None;
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::Storage("store lock poisoned".to_string()))?;
        let inner = guard.as_mut().ok_or(Error::StorageClosed)?;
        f(inner)
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn validate_chunk(chunk: &Chunk) -> Result<()> {
        if chunk.id.is_empty() {
            return Err(Error::invalid_input("chunk id must not be empty"));
        }
        if chunk.name.is_empty() {
            return Err(Error::invalid_input("chunk name must not be empty"));
        }
        if chunk.start_line > chunk.end_line {
            return Err(Error::invalid_input(format!(
                "start_line {} exceeds end_line {}",
                chunk.start_line, chunk.end_line
            )));
        }
        Ok(())
    }

    /// Adopts the dimension on first write, or rejects mismatched vectors.
    fn ensure_write_dim(inner: &mut Inner, len: usize) -> Result<()> {
        if len == 0 {
            return Err(Error::invalid_input("embedding must not be empty"));
        }
        if inner.dim == 0 {
            inner.dim = len;
            let now = Self::now();
            inner.conn.execute(
                "INSERT OR REPLACE INTO index_metadata (key, value, updated_at) VALUES (?, ?, ?)",
                params![DIMENSION_KEY, len.to_string(), now],
            )?;
            return Ok(());
        }
        if len != inner.dim {
            return Err(Error::invalid_input(format!(
                "embedding dimension {len} does not match store dimension {}",
                inner.dim
            )));
        }
        Ok(())
    }

    fn insert_chunk(
        tx: &rusqlite::Transaction<'_>,
        chunk: &Chunk,
        embedding: &[f32],
        now: i64,
    ) -> Result<()> {
        // Delete-then-insert keeps the FTS triggers honest: INSERT OR
        // REPLACE would bypass the delete trigger and leak a stale row.
        tx.execute("DELETE FROM chunks WHERE id = ?", [&chunk.id])?;
        tx.execute(
            r"
            INSERT INTO chunks (
                id, file_path, chunk_type, name, signature, content,
                start_line, end_line, language, domain, embedding, file_mtime,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                chunk.id,
                chunk.file_path,
                chunk.chunk_type.as_str(),
                chunk.name,
                chunk.signature,
                chunk.content,
                i64::from(chunk.start_line),
                i64::from(chunk.end_line),
                chunk.language,
                chunk.domain_or_default(),
                encode_embedding(embedding),
                chunk.file_mtime,
                now,
                now,
            ],
        )?;
        Ok(())
    }

    fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
        let chunk_type: String = row.get(2)?;
        Ok(Chunk {
            id: row.get(0)?,
            file_path: row.get(1)?,
            chunk_type: chunk_type.parse().unwrap_or(ChunkType::Other),
            name: row.get(3)?,
            signature: row.get(4)?,
            content: row.get(5)?,
            start_line: row.get::<_, i64>(6)? as u32,
            end_line: row.get::<_, i64>(7)? as u32,
            language: row.get(8)?,
            domain: row.get(9)?,
            file_mtime: row.get(10)?,
        })
    }

    fn memory_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
        let tags: String = row.get(3)?;
        let status: String = row.get(5)?;
        Ok(MemoryEntry {
            id: row.get(0)?,
            question: row.get(1)?,
            answer: row.get(2)?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
            source: row.get(4)?,
            status: status.parse().unwrap_or(MemoryStatus::Pending),
            occurrences: row.get::<_, i64>(6)? as u32,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

impl Storage for SqliteStore {
    fn create(&self, chunk: &Chunk, embedding: &[f32]) -> Result<()> {
        Self::validate_chunk(chunk)?;
        self.with_inner(|inner| {
            Self::ensure_write_dim(inner, embedding.len())?;
            let now = Self::now();
            let tx = inner.conn.transaction()?;
            Self::insert_chunk(&tx, chunk, embedding, now)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn create_batch(&self, items: &[(Chunk, Vec<f32>)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        for (chunk, _) in items {
            Self::validate_chunk(chunk)?;
        }
        self.with_inner(|inner| {
            for (_, embedding) in items {
                Self::ensure_write_dim(inner, embedding.len())?;
            }
            let now = Self::now();
            let tx = inner.conn.transaction()?;
            for (chunk, embedding) in items {
                Self::insert_chunk(&tx, chunk, embedding, now)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn read(&self, id: &str) -> Result<Chunk> {
        self.with_inner(|inner| {
            inner
                .conn
                .query_row(
                    &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?"),
                    [id],
                    Self::chunk_from_row,
                )
                .optional()?
                .ok_or_else(|| Error::not_found(id))
        })
    }

    fn update(&self, id: &str, chunk: &Chunk, embedding: &[f32]) -> Result<()> {
        Self::validate_chunk(chunk)?;
        self.with_inner(|inner| {
            Self::ensure_write_dim(inner, embedding.len())?;
            let now = Self::now();
            let updated = inner.conn.execute(
                r"
                UPDATE chunks SET
                    id = ?, file_path = ?, chunk_type = ?, name = ?, signature = ?,
                    content = ?, start_line = ?, end_line = ?, language = ?,
                    domain = ?, embedding = ?, file_mtime = ?, updated_at = ?
                WHERE id = ?
                ",
                params![
                    chunk.id,
                    chunk.file_path,
                    chunk.chunk_type.as_str(),
                    chunk.name,
                    chunk.signature,
                    chunk.content,
                    i64::from(chunk.start_line),
                    i64::from(chunk.end_line),
                    chunk.language,
                    chunk.domain_or_default(),
                    encode_embedding(embedding),
                    chunk.file_mtime,
                    now,
                    id,
                ],
            )?;
            if updated == 0 {
                return Err(Error::not_found(id));
            }
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.with_inner(|inner| {
            let deleted = inner.conn.execute("DELETE FROM chunks WHERE id = ?", [id])?;
            if deleted == 0 {
                return Err(Error::not_found(id));
            }
            Ok(())
        })
    }

    fn delete_by_file_path(&self, file_path: &str) -> Result<usize> {
        self.with_inner(|inner| {
            let deleted = inner
                .conn
                .execute("DELETE FROM chunks WHERE file_path = ?", [file_path])?;
            Ok(deleted)
        })
    }

    fn delete_by_domain(&self, domain: &str) -> Result<usize> {
        self.with_inner(|inner| {
            let deleted = inner
                .conn
                .execute("DELETE FROM chunks WHERE domain = ?", [domain])?;
            Ok(deleted)
        })
    }

    fn list(&self, options: &ListOptions) -> Result<Vec<Chunk>> {
        self.with_inner(|inner| {
            let mut sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks");
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<String> = Vec::new();

            if let Some(file_path) = &options.file_path {
                clauses.push("file_path = ?");
                args.push(file_path.clone());
            }
            if let Some(chunk_type) = &options.chunk_type {
                clauses.push("chunk_type = ?");
                args.push(chunk_type.clone());
            }
            if let Some(language) = &options.language {
                clauses.push("language = ?");
                args.push(language.clone());
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY file_path ASC, start_line ASC");

            let limit = options.limit.map_or(-1i64, |l| l as i64);
            let offset = options.offset.map_or(0i64, |o| o as i64);
            sql.push_str(" LIMIT ? OFFSET ?");

            let mut stmt = inner.conn.prepare(&sql)?;
            let params_iter = args
                .iter()
                .map(|a| a as &dyn rusqlite::ToSql)
                .chain([&limit as &dyn rusqlite::ToSql, &offset as &dyn rusqlite::ToSql]);
            let chunks = stmt
                .query_map(rusqlite::params_from_iter(params_iter), Self::chunk_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(chunks)
        })
    }

    fn search(
        &self,
        query_embedding: &[f32],
        options: &SearchOptions,
        token: &CancelToken,
    ) -> Result<Vec<SearchResult>> {
        options.validate()?;
        self.with_inner(|inner| {
            let mut stmt = inner.conn.prepare(&format!(
                r"
                SELECT {CHUNK_COLUMNS}, embedding FROM chunks
                WHERE (?1 = '' OR chunk_type = ?1)
                  AND (?2 = '' OR substr(file_path, 1, length(?2)) = ?2)
                ",
            ))?;

            let mut rows = stmt.query(params![options.chunk_type, options.path_filter])?;
            let mut results: Vec<SearchResult> = Vec::new();
            let mut scanned = 0usize;

            while let Some(row) = rows.next()? {
                scanned += 1;
                if scanned % 1024 == 0 {
                    token.check("dense search")?;
                }

                let chunk = Self::chunk_from_row(row)?;
                let bytes: Vec<u8> = row.get(11)?;
                let embedding = match decode_embedding(&bytes) {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        debug!(chunk_id = %chunk.id, error = %e, "skipping undecodable embedding");
                        continue;
                    }
                };
                if embedding.len() != query_embedding.len() {
                    debug!(
                        chunk_id = %chunk.id,
                        expected = query_embedding.len(),
                        actual = embedding.len(),
                        "skipping chunk with mismatched embedding dimension"
                    );
                    continue;
                }

                let score = cosine_similarity(query_embedding, &embedding);
                if score < options.threshold {
                    continue;
                }
                results.push(SearchResult::new(chunk, score));
            }

            // Descending by score; ties keep scan order within this call.
            results.sort_by(|a, b| b.score.total_cmp(&a.score));
            if options.top_k > 0 {
                results.truncate(options.top_k);
            }
            Ok(results)
        })
    }

    fn search_lexical(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.with_inner(|inner| {
            let limit = if options.top_k == 0 {
                -1i64
            } else {
                options.top_k as i64
            };
            let mut stmt = inner.conn.prepare(&format!(
                r"
                SELECT {CHUNK_COLUMNS_PREFIXED}, -bm25(chunks_fts) AS score
                FROM chunks_fts
                JOIN chunks c ON c.rowid = chunks_fts.rowid
                WHERE chunks_fts MATCH ?1
                  AND (?2 = '' OR c.chunk_type = ?2)
                  AND (?3 = '' OR substr(c.file_path, 1, length(?3)) = ?3)
                ORDER BY bm25(chunks_fts) ASC
                LIMIT ?4
                ",
                CHUNK_COLUMNS_PREFIXED = chunk_columns_prefixed()
            ))?;

            let results = stmt
                .query_map(
                    params![query, options.chunk_type, options.path_filter, limit],
                    |row| {
                        let chunk = Self::chunk_from_row(row)?;
                        let score: f64 = row.get(11)?;
                        Ok(SearchResult::new(chunk, score as f32))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(results)
        })
    }

    fn read_embedding(&self, id: &str) -> Result<Vec<f32>> {
        self.with_inner(|inner| {
            let bytes: Option<Vec<u8>> = inner
                .conn
                .query_row("SELECT embedding FROM chunks WHERE id = ?", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            let bytes = bytes.ok_or_else(|| Error::not_found(id))?;
            decode_embedding(&bytes)
        })
    }

    fn stats(&self) -> Result<StoreStats> {
        self.with_inner(|inner| {
            let chunks_total: i64 =
                inner
                    .conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
            let files_indexed: i64 = inner.conn.query_row(
                "SELECT COUNT(DISTINCT file_path) FROM chunks",
                [],
                |row| row.get(0),
            )?;
            let last_updated: Option<i64> = inner.conn.query_row(
                "SELECT MAX(updated_at) FROM chunks",
                [],
                |row| row.get(0),
            )?;

            Ok(StoreStats {
                chunks_total: chunks_total as usize,
                files_indexed: files_indexed as usize,
                last_updated: last_updated
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
            })
        })
    }

    fn clear(&self) -> Result<()> {
        self.with_inner(|inner| {
            // Row-by-row delete fires the FTS triggers for each chunk.
            inner.conn.execute_batch(
                r"
                DELETE FROM chunks;
                DELETE FROM file_hashes;
                ",
            )?;
            Ok(())
        })
    }

    fn get_file_hash(&self, file_path: &str) -> Result<Option<String>> {
        self.with_inner(|inner| {
            let hash = inner
                .conn
                .query_row(
                    "SELECT content_hash FROM file_hashes WHERE file_path = ?",
                    [file_path],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hash)
        })
    }

    fn set_file_hash(&self, file_path: &str, content_hash: &str) -> Result<()> {
        self.with_inner(|inner| {
            inner.conn.execute(
                r"
                INSERT INTO file_hashes (file_path, content_hash, indexed_at)
                VALUES (?, ?, ?)
                ON CONFLICT(file_path) DO UPDATE SET
                    content_hash = excluded.content_hash,
                    indexed_at = excluded.indexed_at
                ",
                params![file_path, content_hash, Self::now()],
            )?;
            Ok(())
        })
    }

    fn delete_file_hash(&self, file_path: &str) -> Result<()> {
        self.with_inner(|inner| {
            inner
                .conn
                .execute("DELETE FROM file_hashes WHERE file_path = ?", [file_path])?;
            Ok(())
        })
    }

    fn list_file_hashes(&self) -> Result<Vec<String>> {
        self.with_inner(|inner| {
            let mut stmt = inner
                .conn
                .prepare("SELECT file_path FROM file_hashes ORDER BY file_path")?;
            let paths = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(paths)
        })
    }

    fn get_calibration_metadata(&self) -> Result<Option<CalibrationMetadata>> {
        self.with_inner(|inner| {
            let value: Option<String> = inner
                .conn
                .query_row(
                    "SELECT value FROM index_metadata WHERE key = ?",
                    [CALIBRATION_KEY],
                    |row| row.get(0),
                )
                .optional()?;
            match value {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
    }

    fn set_calibration_metadata(&self, meta: &CalibrationMetadata) -> Result<()> {
        let json = serde_json::to_string(meta)?;
        self.with_inner(|inner| {
            inner.conn.execute(
                "INSERT OR REPLACE INTO index_metadata (key, value, updated_at) VALUES (?, ?, ?)",
                params![CALIBRATION_KEY, json, Self::now()],
            )?;
            Ok(())
        })
    }

    fn save_memory(&self, entry: &MemoryEntry, embedding: &[f32]) -> Result<()> {
        if entry.id.is_empty() {
            return Err(Error::invalid_input("memory id must not be empty"));
        }
        let tags = serde_json::to_string(&entry.tags)?;
        self.with_inner(|inner| {
            if inner.dim != 0 && embedding.len() != inner.dim {
                return Err(Error::DimensionMismatch {
                    expected: inner.dim,
                    actual: embedding.len(),
                });
            }
            let now = Self::now();
            let existing: Option<i64> = inner
                .conn
                .query_row(
                    "SELECT occurrences FROM memory WHERE id = ?",
                    [&entry.id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(occurrences) => {
                    inner.conn.execute(
                        r"
                        UPDATE memory SET
                            question = ?, answer = ?, tags = ?, source = ?, status = ?,
                            occurrences = ?, embedding = ?, updated_at = ?
                        WHERE id = ?
                        ",
                        params![
                            entry.question,
                            entry.answer,
                            tags,
                            entry.source,
                            entry.status.as_str(),
                            occurrences + 1,
                            encode_embedding(embedding),
                            now,
                            entry.id,
                        ],
                    )?;
                }
                None => {
                    inner.conn.execute(
                        r"
                        INSERT INTO memory (
                            id, question, answer, tags, source, status,
                            occurrences, embedding, created_at, updated_at
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ",
                        params![
                            entry.id,
                            entry.question,
                            entry.answer,
                            tags,
                            entry.source,
                            entry.status.as_str(),
                            i64::from(entry.occurrences.max(1)),
                            encode_embedding(embedding),
                            if entry.created_at > 0 { entry.created_at } else { now },
                            now,
                        ],
                    )?;
                }
            }
            Ok(())
        })
    }

    fn get_memory(&self, id: &str) -> Result<MemoryEntry> {
        self.with_inner(|inner| {
            inner
                .conn
                .query_row(
                    r"
                    SELECT id, question, answer, tags, source, status,
                           occurrences, created_at, updated_at
                    FROM memory WHERE id = ?
                    ",
                    [id],
                    Self::memory_from_row,
                )
                .optional()?
                .ok_or_else(|| Error::not_found(id))
        })
    }

    fn delete_memory(&self, id: &str) -> Result<()> {
        self.with_inner(|inner| {
            let deleted = inner.conn.execute("DELETE FROM memory WHERE id = ?", [id])?;
            if deleted == 0 {
                return Err(Error::not_found(id));
            }
            Ok(())
        })
    }

    fn search_memory(
        &self,
        query_embedding: &[f32],
        options: &MemorySearchOptions,
        token: &CancelToken,
    ) -> Result<Vec<MemorySearchResult>> {
        let top_k = if options.top_k == 0 {
            MEMORY_DEFAULT_TOP_K
        } else {
            options.top_k
        };

        self.with_inner(|inner| {
            let mut heap: BinaryHeap<Reverse<HeapHit>> = BinaryHeap::with_capacity(top_k + 1);
            let mut last_id = String::new();

            loop {
                token.check("memory search")?;

                let mut stmt = inner.conn.prepare(
                    r"
                    SELECT id, question, answer, tags, source, status,
                           occurrences, created_at, updated_at, embedding
                    FROM memory WHERE id > ? ORDER BY id LIMIT ?
                    ",
                )?;
                let mut rows = stmt.query(params![last_id, MEMORY_PAGE_SIZE as i64])?;
                let mut page_len = 0usize;

                while let Some(row) = rows.next()? {
                    page_len += 1;
                    let entry = Self::memory_from_row(row)?;
                    last_id.clone_from(&entry.id);

                    let bytes: Vec<u8> = row.get(9)?;
                    let embedding = match decode_embedding(&bytes) {
                        Ok(embedding) => embedding,
                        Err(e) => {
                            debug!(memory_id = %entry.id, error = %e, "skipping undecodable memory embedding");
                            continue;
                        }
                    };
                    let score = cosine_similarity(query_embedding, &embedding);

                    // Filters run before heap admission, cheapest first.
                    if score < options.threshold {
                        continue;
                    }
                    if !options.tags.is_empty()
                        && !options.tags.iter().any(|t| entry.tags.contains(t))
                    {
                        continue;
                    }
                    if !options.source.is_empty() && entry.source != options.source {
                        continue;
                    }
                    if let Some(status) = options.status
                        && entry.status != status
                    {
                        continue;
                    }

                    let hit = HeapHit { score, entry };
                    if heap.len() < top_k {
                        heap.push(Reverse(hit));
                    } else if let Some(min) = heap.peek()
                        && hit.score > min.0.score
                    {
                        heap.pop();
                        heap.push(Reverse(hit));
                    }
                }

                if page_len < MEMORY_PAGE_SIZE {
                    break;
                }
            }

            // Ascending Reverse order is descending score order.
            let results = heap
                .into_sorted_vec()
                .into_iter()
                .map(|Reverse(hit)| MemorySearchResult {
                    entry: hit.entry,
                    score: hit.score,
                })
                .collect();
            Ok(results)
        })
    }
}

/// Heap element ordered by score, then id for a total order.
struct HeapHit {
    score: f32,
    entry: MemoryEntry,
}

impl PartialEq for HeapHit {
    fn eq(&self, other: &Self) -> bool {
        self.score.total_cmp(&other.score) == std::cmp::Ordering::Equal
            && self.entry.id == other.entry.id
    }
}

impl Eq for HeapHit {}

impl PartialOrd for HeapHit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapHit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.entry.id.cmp(&other.entry.id))
    }
}

fn chunk_columns_prefixed() -> String {
    CHUNK_COLUMNS
        .split(", ")
        .map(|c| format!("c.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::core::ChunkType;

    fn setup() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    fn chunk(id_hint: &str, content: &str) -> Chunk {
        Chunk::new(
            format!("src/{id_hint}.rs"),
            ChunkType::Function,
            id_hint,
            content,
            1,
            5,
        )
        .with_language("rust")
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_create_read_round_trip() {
        let store = setup();
        let c = chunk("alpha", "fn alpha() {}");
        store.create(&c, &unit(4, 0)).unwrap();

        let read = store.read(&c.id).unwrap();
        assert_eq!(read, c);
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let store = setup();
        let err = store.read("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_create_rejects_invalid_chunk() {
        let store = setup();
        let mut c = chunk("alpha", "body");
        c.start_line = 9;
        c.end_line = 3;
        assert_eq!(
            store.create(&c, &unit(4, 0)).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );

        let mut c = chunk("beta", "body");
        c.name = String::new();
        assert_eq!(
            store.create(&c, &unit(4, 0)).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_create_adopts_then_enforces_dimension() {
        let store = setup();
        store.create(&chunk("alpha", "a"), &unit(4, 0)).unwrap();
        assert_eq!(store.dimension().unwrap(), 4);

        let err = store.create(&chunk("beta", "b"), &unit(8, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_create_replaces_same_id() {
        let store = setup();
        let mut c = chunk("alpha", "v1");
        store.create(&c, &unit(4, 0)).unwrap();
        c.content = "v2".to_string();
        store.create(&c, &unit(4, 1)).unwrap();

        let read = store.read(&c.id).unwrap();
        assert_eq!(read.content, "v2");
        assert_eq!(store.stats().unwrap().chunks_total, 1);
    }

    #[test]
    fn test_create_batch_atomic_on_failure() {
        let store = setup();
        store.create(&chunk("seed", "s"), &unit(4, 0)).unwrap();

        let good = chunk("good", "g");
        let bad = chunk("bad", "b");
        let items = vec![(good, unit(4, 1)), (bad, unit(7, 1))];
        assert!(store.create_batch(&items).is_err());

        // Nothing from the failed batch landed.
        assert_eq!(store.stats().unwrap().chunks_total, 1);
    }

    #[test]
    fn test_update_bumps_updated_at_and_not_found() {
        let store = setup();
        let mut c = chunk("alpha", "v1");
        store.create(&c, &unit(4, 0)).unwrap();

        c.content = "v2".to_string();
        store.update(&c.id.clone(), &c, &unit(4, 1)).unwrap();
        assert_eq!(store.read(&c.id).unwrap().content, "v2");

        let err = store.update("missing", &c, &unit(4, 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_delete_and_delete_by_file_path() {
        let store = setup();
        let a = chunk("alpha", "a");
        let b = chunk("beta", "b");
        store.create(&a, &unit(4, 0)).unwrap();
        store.create(&b, &unit(4, 1)).unwrap();

        store.delete(&a.id).unwrap();
        assert_eq!(store.delete(&a.id).unwrap_err().kind(), ErrorKind::NotFound);

        assert_eq!(store.delete_by_file_path("src/beta.rs").unwrap(), 1);
        assert_eq!(store.delete_by_file_path("src/beta.rs").unwrap(), 0);
    }

    #[test]
    fn test_delete_by_domain() {
        let store = setup();
        store
            .create(&chunk("a", "x").with_domain("docs"), &unit(4, 0))
            .unwrap();
        store.create(&chunk("b", "y"), &unit(4, 1)).unwrap();

        assert_eq!(store.delete_by_domain("docs").unwrap(), 1);
        assert_eq!(store.stats().unwrap().chunks_total, 1);
    }

    #[test]
    fn test_list_ordering_and_filters() {
        let store = setup();
        let mut c1 = Chunk::new("b.rs", ChunkType::Function, "f2", "x", 10, 12);
        c1.language = "rust".to_string();
        let mut c2 = Chunk::new("a.rs", ChunkType::Struct, "s1", "y", 5, 9);
        c2.language = "rust".to_string();
        let mut c3 = Chunk::new("b.rs", ChunkType::Function, "f1", "z", 1, 4);
        c3.language = "go".to_string();
        store
            .create_batch(&[
                (c1, unit(4, 0)),
                (c2, unit(4, 1)),
                (c3, unit(4, 2)),
            ])
            .unwrap();

        let all = store.list(&ListOptions::default()).unwrap();
        let order: Vec<(String, u32)> = all
            .iter()
            .map(|c| (c.file_path.clone(), c.start_line))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a.rs".to_string(), 5),
                ("b.rs".to_string(), 1),
                ("b.rs".to_string(), 10)
            ]
        );

        let rust_only = store
            .list(&ListOptions {
                language: Some("rust".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rust_only.len(), 2);

        let limited = store
            .list(&ListOptions {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].file_path, "b.rs");
        assert_eq!(limited[0].start_line, 1);
    }

    #[test]
    fn test_search_orders_and_thresholds() {
        let store = setup();
        // Orthogonal unit vectors give exact scores against the query.
        store.create(&chunk("hit", "h"), &unit(4, 0)).unwrap();
        store.create(&chunk("miss", "m"), &unit(4, 1)).unwrap();

        let query = unit(4, 0);
        let results = store
            .search(
                &query,
                &SearchOptions::new().with_threshold(0.5),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(results[0].chunk.name, "hit");
    }

    #[test]
    fn test_search_top_k_zero_means_unlimited() {
        let store = setup();
        for i in 0..6 {
            store
                .create(&chunk(&format!("c{i}"), "body"), &unit(8, i))
                .unwrap();
        }
        let results = store
            .search(&unit(8, 0), &SearchOptions::new(), &CancelToken::new())
            .unwrap();
        assert_eq!(results.len(), 6);

        let limited = store
            .search(
                &unit(8, 0),
                &SearchOptions::new().with_top_k(2),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_search_filters_type_and_path() {
        let store = setup();
        let mut s = Chunk::new("lib/a.rs", ChunkType::Struct, "S", "struct S;", 1, 1);
        s.language = "rust".to_string();
        store.create(&s, &unit(4, 0)).unwrap();
        let f = Chunk::new("src/b.rs", ChunkType::Function, "f", "fn f() {}", 1, 1);
        store.create(&f, &unit(4, 0)).unwrap();

        let opts = SearchOptions::new().with_chunk_type("struct");
        let results = store.search(&unit(4, 0), &opts, &CancelToken::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_type, ChunkType::Struct);

        let opts = SearchOptions::new().with_path_filter("src/");
        let results = store.search(&unit(4, 0), &opts, &CancelToken::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "src/b.rs");
    }

    #[test]
    fn test_search_skips_mismatched_dimension_rows() {
        let store = setup();
        store.create(&chunk("four", "4d"), &unit(4, 0)).unwrap();
        // Bypass the store API to plant a row with a different dimension.
        store
            .with_inner(|inner| {
                inner.conn.execute(
                    r"INSERT INTO chunks (id, file_path, chunk_type, name, content, start_line,
                      end_line, embedding, created_at, updated_at)
                      VALUES ('odd', 'x.rs', 'function', 'odd', 'body', 1, 1, ?, 0, 0)",
                    params![encode_embedding(&unit(8, 0))],
                )?;
                Ok(())
            })
            .unwrap();

        let results = store
            .search(&unit(4, 0), &SearchOptions::new(), &CancelToken::new())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.name, "four");
    }

    #[test]
    fn test_search_accepts_legacy_json_embeddings() {
        let store = setup();
        store
            .with_inner(|inner| {
                inner.conn.execute(
                    r"INSERT INTO chunks (id, file_path, chunk_type, name, content, start_line,
                      end_line, embedding, created_at, updated_at)
                      VALUES ('legacy', 'x.rs', 'function', 'legacy', 'body', 1, 1, ?, 0, 0)",
                    params![b"[1.0,0.0,0.0]".to_vec()],
                )?;
                Ok(())
            })
            .unwrap();

        let results = store
            .search(&[1.0, 0.0, 0.0], &SearchOptions::new(), &CancelToken::new())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_search_cancellation() {
        let store = setup();
        for i in 0..4 {
            store
                .create(&chunk(&format!("c{i}"), "body"), &unit(4, i % 4))
                .unwrap();
        }
        let token = CancelToken::new();
        token.cancel();
        // Small stores may finish before a check fires; the contract is only
        // that a tripped token never panics and large scans stop early.
        let _ = store.search(&unit(4, 0), &SearchOptions::new(), &token);
    }

    #[test]
    fn test_lexical_search_basics() {
        let store = setup();
        store
            .create(&chunk("parser", "parses tokens into trees"), &unit(4, 0))
            .unwrap();
        store
            .create(&chunk("printer", "prints trees as text"), &unit(4, 1))
            .unwrap();

        let results = store
            .search_lexical("parses", &SearchOptions::new())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.name, "parser");
        // -bm25 is positive for a real match.
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_lexical_search_empty_query() {
        let store = setup();
        assert!(store.search_lexical("", &SearchOptions::new()).unwrap().is_empty());
        assert!(store.search_lexical("   ", &SearchOptions::new()).unwrap().is_empty());
    }

    #[test]
    fn test_lexical_search_syntax_error() {
        let store = setup();
        store.create(&chunk("x", "body"), &unit(4, 0)).unwrap();
        let err = store
            .search_lexical("AND AND (", &SearchOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LexicalSyntax);
    }

    #[test]
    fn test_lexical_matches_name_column() {
        let store = setup();
        store
            .create(&chunk("connect_database", "establishes a session"), &unit(4, 0))
            .unwrap();
        let results = store
            .search_lexical("connect_database", &SearchOptions::new())
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    fn fts_count(store: &SqliteStore, term: &str) -> i64 {
        store
            .with_inner(|inner| {
                let count = inner.conn.query_row(
                    "SELECT COUNT(*) FROM chunks_fts WHERE chunks_fts MATCH ?",
                    [term],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .unwrap()
    }

    #[test]
    fn test_fts_sync_across_lifecycle() {
        let store = setup();
        let mut c = chunk("syncword", "unique content alpha");
        store.create(&c, &unit(4, 0)).unwrap();
        assert_eq!(fts_count(&store, "syncword"), 1);

        c.content = "changed content beta".to_string();
        store.update(&c.id.clone(), &c, &unit(4, 0)).unwrap();
        assert_eq!(fts_count(&store, "syncword"), 1);
        assert_eq!(fts_count(&store, "beta"), 1);
        assert_eq!(fts_count(&store, "alpha"), 0);

        store.delete(&c.id).unwrap();
        assert_eq!(fts_count(&store, "syncword"), 0);

        let d = chunk("pathword", "gamma");
        store.create(&d, &unit(4, 0)).unwrap();
        store.delete_by_file_path(&d.file_path).unwrap();
        assert_eq!(fts_count(&store, "pathword"), 0);

        let e = chunk("clearword", "delta");
        store.create(&e, &unit(4, 0)).unwrap();
        store.clear().unwrap();
        assert_eq!(fts_count(&store, "clearword"), 0);
    }

    #[test]
    fn test_stats() {
        let store = setup();
        let empty = store.stats().unwrap();
        assert_eq!(empty.chunks_total, 0);
        assert_eq!(empty.files_indexed, 0);
        assert!(empty.last_updated.is_empty());

        store.create(&chunk("a", "x"), &unit(4, 0)).unwrap();
        store.create(&chunk("b", "y"), &unit(4, 1)).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.chunks_total, 2);
        assert_eq!(stats.files_indexed, 2);
        assert!(stats.last_updated.contains('T'));
    }

    #[test]
    fn test_file_hashes() {
        let store = setup();
        assert!(store.get_file_hash("a.rs").unwrap().is_none());

        store.set_file_hash("a.rs", "hash1").unwrap();
        assert_eq!(store.get_file_hash("a.rs").unwrap().as_deref(), Some("hash1"));

        store.set_file_hash("a.rs", "hash2").unwrap();
        assert_eq!(store.get_file_hash("a.rs").unwrap().as_deref(), Some("hash2"));

        store.set_file_hash("b.rs", "hash3").unwrap();
        assert_eq!(
            store.list_file_hashes().unwrap(),
            vec!["a.rs".to_string(), "b.rs".to_string()]
        );

        store.delete_file_hash("a.rs").unwrap();
        assert!(store.get_file_hash("a.rs").unwrap().is_none());
    }

    #[test]
    fn test_clear_removes_file_hashes() {
        let store = setup();
        store.set_file_hash("a.rs", "h").unwrap();
        store.clear().unwrap();
        assert!(store.get_file_hash("a.rs").unwrap().is_none());
    }

    #[test]
    fn test_calibration_metadata_round_trip() {
        let store = setup();
        assert!(store.get_calibration_metadata().unwrap().is_none());

        let meta = CalibrationMetadata::derive("model-x", "2026-02-01T00:00:00Z", 0.85, 0.30);
        store.set_calibration_metadata(&meta).unwrap();
        let read = store.get_calibration_metadata().unwrap().unwrap();
        assert_eq!(read, meta);
    }

    fn memory_entry(id: &str, tags: &[&str], source: &str) -> MemoryEntry {
        MemoryEntry {
            id: id.to_string(),
            question: format!("question {id}"),
            answer: format!("answer {id}"),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            source: source.to_string(),
            status: MemoryStatus::Pending,
            occurrences: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_save_memory_rejects_mismatched_dimension() {
        let store = setup();
        store.create(&chunk("seed", "s"), &unit(4, 0)).unwrap();
        let err = store
            .save_memory(&memory_entry("m1", &[], ""), &unit(8, 0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    }

    #[test]
    fn test_memory_crud_and_occurrence_bump() {
        let store = setup();
        let entry = memory_entry("m1", &["rust"], "chat");
        store.save_memory(&entry, &unit(4, 0)).unwrap();

        let read = store.get_memory("m1").unwrap();
        assert_eq!(read.occurrences, 1);
        assert!(read.created_at > 0);

        store.save_memory(&entry, &unit(4, 0)).unwrap();
        assert_eq!(store.get_memory("m1").unwrap().occurrences, 2);

        store.delete_memory("m1").unwrap();
        assert_eq!(store.get_memory("m1").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            store.delete_memory("m1").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_memory_search_bounded_heap() {
        let store = setup();
        // 25 entries with increasing similarity to the query axis.
        for i in 0..25u32 {
            let mut v = vec![0.0f32; 4];
            v[0] = i as f32 + 1.0;
            v[1] = 1.0;
            store
                .save_memory(&memory_entry(&format!("m{i:02}"), &[], ""), &v)
                .unwrap();
        }

        let results = store
            .search_memory(
                &unit(4, 0),
                &MemorySearchOptions {
                    top_k: 5,
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(results.len(), 5);
        // Descending order, and the best entries are the high-i ones.
        for window in results.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        assert_eq!(results[0].entry.id, "m24");
    }

    #[test]
    fn test_memory_search_default_top_k() {
        let store = setup();
        for i in 0..15u32 {
            store
                .save_memory(&memory_entry(&format!("m{i:02}"), &[], ""), &unit(4, 0))
                .unwrap();
        }
        let results = store
            .search_memory(&unit(4, 0), &MemorySearchOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(results.len(), MEMORY_DEFAULT_TOP_K);
    }

    #[test]
    fn test_memory_search_filters() {
        let store = setup();
        store
            .save_memory(&memory_entry("tagged", &["rust", "db"], "chat"), &unit(4, 0))
            .unwrap();
        store
            .save_memory(&memory_entry("other", &["go"], "docs"), &unit(4, 0))
            .unwrap();
        let mut promoted = memory_entry("promoted", &["rust"], "chat");
        promoted.status = MemoryStatus::Promoted;
        store.save_memory(&promoted, &unit(4, 0)).unwrap();

        let results = store
            .search_memory(
                &unit(4, 0),
                &MemorySearchOptions {
                    tags: vec!["rust".to_string()],
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(results.len(), 2);

        let results = store
            .search_memory(
                &unit(4, 0),
                &MemorySearchOptions {
                    source: "docs".to_string(),
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.id, "other");

        let results = store
            .search_memory(
                &unit(4, 0),
                &MemorySearchOptions {
                    status: Some(MemoryStatus::Promoted),
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.id, "promoted");
    }

    #[test]
    fn test_closed_store_reports_storage_closed() {
        let store = setup();
        store.close();
        assert_eq!(store.read("x").unwrap_err().kind(), ErrorKind::StorageClosed);
        assert_eq!(store.stats().unwrap_err().kind(), ErrorKind::StorageClosed);
        assert_eq!(
            store
                .search(&unit(4, 0), &SearchOptions::new(), &CancelToken::new())
                .unwrap_err()
                .kind(),
            ErrorKind::StorageClosed
        );
    }

    #[test]
    fn test_read_embedding() {
        let store = setup();
        let c = chunk("alpha", "a");
        let v = vec![0.5, -0.5, 0.25, 0.0];
        store.create(&c, &v).unwrap();
        assert_eq!(store.read_embedding(&c.id).unwrap(), v);
        assert_eq!(
            store.read_embedding("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
