//! Sibling lexical index for external vector backends.
//!
//! When chunks live in an external vector service with no native full-text
//! support, a parallel on-disk index mirrors `{id, file_path, type, name,
//! content}` and serves the BM25 side of hybrid search. Mirror writes are
//! supplementary: callers log failures as warnings and let the primary write
//! succeed, because the mirror can always be rebuilt from the backend.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, params};
use tracing::warn;

use crate::core::{Chunk, ChunkType, SearchOptions, SearchResult};
use crate::error::{Error, Result};

const MIRROR_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    name TEXT NOT NULL,
    content TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mirror_file_path ON chunks(file_path);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    name,
    content,
    content='chunks',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, name, content) VALUES (new.rowid, new.name, new.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, name, content)
    VALUES('delete', old.rowid, old.name, old.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, name, content)
    VALUES('delete', old.rowid, old.name, old.content);
    INSERT INTO chunks_fts(rowid, name, content) VALUES (new.rowid, new.name, new.content);
END;
";

static NON_COLLECTION_CHARS: std::sync::LazyLock<Option<regex::Regex>> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"[^A-Za-z0-9_-]").ok());

/// Keeps alphanumerics, `-`, and `_`; everything else is dropped. Empty
/// sanitizations become `"default"`.
#[must_use]
pub fn sanitize_collection(collection: &str) -> String {
    let cleaned = NON_COLLECTION_CHARS.as_ref().map_or_else(
        || collection.to_string(),
        |re| re.replace_all(collection, "").into_owned(),
    );
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

/// Default mirror location: `<data_dir>/codeseek/<backend>-fts-<collection>.db`.
#[must_use]
pub fn default_mirror_path(backend: &str, collection: &str) -> PathBuf {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("codeseek").join(format!(
        "{}-fts-{}.db",
        sanitize_collection(backend),
        sanitize_collection(collection)
    ))
}

/// On-disk sibling lexical index.
///
/// Satisfies the same lexical contract as the co-located index: `-bm25`
/// scores, empty queries return empty lists, malformed queries surface
/// `LexicalSyntax`.
pub struct FtsMirror {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl FtsMirror {
    /// Opens or creates the mirror at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        let _: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        conn.execute_batch(MIRROR_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Creates an in-memory mirror. Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MIRROR_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Returns the mirror's path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| Error::Storage("mirror lock poisoned".to_string()))?;
        f(&mut guard)
    }

    /// Mirrors a single chunk, replacing any previous row with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; callers treat this as a warning.
    pub fn create(&self, chunk: &Chunk) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            Self::upsert(&tx, chunk)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Mirrors a batch of chunks in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; callers treat this as a warning.
    pub fn create_batch(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for chunk in chunks {
                Self::upsert(&tx, chunk)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn upsert(tx: &rusqlite::Transaction<'_>, chunk: &Chunk) -> Result<()> {
        // Delete-then-insert so the FTS triggers fire for both halves.
        tx.execute("DELETE FROM chunks WHERE id = ?", [&chunk.id])?;
        tx.execute(
            "INSERT INTO chunks (id, file_path, chunk_type, name, content) VALUES (?, ?, ?, ?, ?)",
            params![
                chunk.id,
                chunk.file_path,
                chunk.chunk_type.as_str(),
                chunk.name,
                chunk.content,
            ],
        )?;
        Ok(())
    }

    /// Removes a chunk from the mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM chunks WHERE id = ?", [id])?;
            Ok(())
        })
    }

    /// Removes every chunk for a file path, returning the removed count.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_by_file_path(&self, file_path: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM chunks WHERE file_path = ?", [file_path])?;
            Ok(deleted)
        })
    }

    /// Empties the mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails.
    pub fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM chunks", [])?;
            Ok(())
        })
    }

    /// Number of mirrored rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    #[allow(clippy::cast_sign_loss)]
    pub fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Replaces the whole mirror with the given chunks.
    ///
    /// Used to recover after tolerated write failures have left the mirror
    /// behind the primary store.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebuild fails.
    pub fn rebuild(&self, chunks: &[Chunk]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM chunks", [])?;
            for chunk in chunks {
                Self::upsert(&tx, chunk)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Best-effort mirror write: failures are logged as warnings and
    /// swallowed so the primary write can succeed.
    pub fn mirror_batch(&self, chunks: &[Chunk]) {
        if let Err(e) = self.create_batch(chunks) {
            warn!(error = %e, count = chunks.len(), "sibling lexical index write failed");
        }
    }

    /// BM25 search over the mirrored `(name, content)` columns.
    ///
    /// Returned results carry skeleton chunks (id, path, type, name,
    /// content); the external backend owns the full payloads.
    ///
    /// # Errors
    ///
    /// `LexicalSyntax` for malformed full-text queries.
    #[allow(clippy::cast_possible_truncation)]
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let limit = if options.top_k == 0 {
                -1i64
            } else {
                options.top_k as i64
            };
            let mut stmt = conn.prepare(
                r"
                SELECT c.id, c.file_path, c.chunk_type, c.name, c.content,
                       -bm25(chunks_fts) AS score
                FROM chunks_fts
                JOIN chunks c ON c.rowid = chunks_fts.rowid
                WHERE chunks_fts MATCH ?1
                  AND (?2 = '' OR c.chunk_type = ?2)
                  AND (?3 = '' OR substr(c.file_path, 1, length(?3)) = ?3)
                ORDER BY bm25(chunks_fts) ASC
                LIMIT ?4
                ",
            )?;

            let results = stmt
                .query_map(
                    params![query, options.chunk_type, options.path_filter, limit],
                    |row| {
                        let chunk_type: String = row.get(2)?;
                        let mut chunk = Chunk::new(
                            row.get::<_, String>(1)?,
                            chunk_type.parse().unwrap_or(ChunkType::Other),
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            0,
                            0,
                        );
                        chunk.id = row.get(0)?;
                        let score: f64 = row.get(5)?;
                        Ok(SearchResult::new(chunk, score as f32))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(results)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn chunk(id_hint: &str, content: &str) -> Chunk {
        Chunk::new(
            format!("src/{id_hint}.rs"),
            ChunkType::Function,
            id_hint,
            content,
            1,
            3,
        )
    }

    #[test]
    fn test_sanitize_collection() {
        assert_eq!(sanitize_collection("code"), "code");
        assert_eq!(sanitize_collection("my-project_v2"), "my-project_v2");
        assert_eq!(sanitize_collection("path/to/repo"), "pathtorepo");
        assert_eq!(sanitize_collection("!!!"), "default");
        assert_eq!(sanitize_collection(""), "default");
    }

    #[test]
    fn test_default_mirror_path_shape() {
        let path = default_mirror_path("qdrant", "my repo!");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, "qdrant-fts-myrepo.db");
    }

    #[test]
    fn test_mirror_search_round_trip() {
        let mirror = FtsMirror::in_memory().unwrap();
        mirror.create(&chunk("parser", "parses tokens into trees")).unwrap();
        mirror.create(&chunk("printer", "prints trees")).unwrap();

        let results = mirror.search("parses", &SearchOptions::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.name, "parser");
        assert!(results[0].score > 0.0);
    }

    #[test]
    fn test_mirror_sync_counts() {
        let mirror = FtsMirror::in_memory().unwrap();
        let c = chunk("syncword", "alpha content");
        mirror.create(&c).unwrap();
        assert_eq!(mirror.search("syncword", &SearchOptions::new()).unwrap().len(), 1);

        // Re-create replaces rather than duplicates.
        mirror.create(&c).unwrap();
        assert_eq!(mirror.search("syncword", &SearchOptions::new()).unwrap().len(), 1);

        mirror.delete(&c.id).unwrap();
        assert!(mirror.search("syncword", &SearchOptions::new()).unwrap().is_empty());

        let d = chunk("pathword", "beta");
        mirror.create(&d).unwrap();
        assert_eq!(mirror.delete_by_file_path(&d.file_path).unwrap(), 1);
        assert!(mirror.search("pathword", &SearchOptions::new()).unwrap().is_empty());

        mirror.create_batch(&[chunk("one", "x"), chunk("two", "y")]).unwrap();
        assert_eq!(mirror.count().unwrap(), 2);
        mirror.clear().unwrap();
        assert_eq!(mirror.count().unwrap(), 0);
    }

    #[test]
    fn test_mirror_rebuild() {
        let mirror = FtsMirror::in_memory().unwrap();
        mirror.create(&chunk("stale", "old row")).unwrap();

        mirror
            .rebuild(&[chunk("fresh", "new row"), chunk("fresh2", "another")])
            .unwrap();
        assert_eq!(mirror.count().unwrap(), 2);
        assert!(mirror.search("stale", &SearchOptions::new()).unwrap().is_empty());
        assert_eq!(mirror.search("fresh", &SearchOptions::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_mirror_empty_query() {
        let mirror = FtsMirror::in_memory().unwrap();
        assert!(mirror.search("", &SearchOptions::new()).unwrap().is_empty());
    }

    #[test]
    fn test_mirror_syntax_error() {
        let mirror = FtsMirror::in_memory().unwrap();
        mirror.create(&chunk("x", "body")).unwrap();
        let err = mirror.search("AND AND (", &SearchOptions::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LexicalSyntax);
    }

    #[test]
    fn test_mirror_filters() {
        let mirror = FtsMirror::in_memory().unwrap();
        let mut s = chunk("shared_term", "shared_term struct body");
        s.chunk_type = ChunkType::Struct;
        s.file_path = "lib/a.rs".to_string();
        mirror.create(&s).unwrap();
        mirror.create(&chunk("shared_term2", "shared_term fn body")).unwrap();

        let opts = SearchOptions::new().with_chunk_type("struct");
        let results = mirror.search("shared_term", &opts).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_type, ChunkType::Struct);

        let opts = SearchOptions::new().with_path_filter("src/");
        let results = mirror.search("shared_term", &opts).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].chunk.file_path.starts_with("src/"));
    }

    #[test]
    fn test_mirror_batch_swallow_failures() {
        // mirror_batch never panics or errors, even on a poisoned handle.
        let mirror = FtsMirror::in_memory().unwrap();
        mirror.mirror_batch(&[chunk("ok", "fine")]);
        assert_eq!(mirror.count().unwrap(), 1);
    }
}
