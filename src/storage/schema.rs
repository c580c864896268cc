//! Database schema definitions.
//!
//! SQL schema and additive migration logic for the chunk store. Opening an
//! existing database is idempotent: every statement is `IF NOT EXISTS` and
//! column additions are guarded by `PRAGMA table_info` checks.

use rusqlite::Connection;

use crate::error::Result;

/// SQL schema for initial database setup.
pub const SCHEMA_SQL: &str = r"
-- Retrievable chunks with their dense embeddings
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    name TEXT NOT NULL,
    signature TEXT,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    language TEXT NOT NULL DEFAULT '',
    domain TEXT NOT NULL DEFAULT 'code',
    embedding BLOB NOT NULL,
    file_mtime INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path);

-- Per-file content hashes for incremental re-indexing
CREATE TABLE IF NOT EXISTS file_hashes (
    file_path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    indexed_at INTEGER NOT NULL
);

-- Key/value metadata (calibration record, embedding dimension, ...)
CREATE TABLE IF NOT EXISTS index_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Q&A memory entries with their own embeddings
CREATE TABLE IF NOT EXISTS memory (
    id TEXT PRIMARY KEY,
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    source TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    occurrences INTEGER NOT NULL DEFAULT 1,
    embedding BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// FTS5 virtual table over `(name, content)` plus the triggers keeping it in
/// lockstep with the chunks table. Created separately from the base schema
/// so the same SQL serves both fresh installs and migrations of pre-FTS
/// databases.
pub const FTS_SQL: &str = r"
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

/// Backfills the lexical index from existing chunks.
pub const FTS_BACKFILL_SQL: &str = r"
INSERT INTO chunks_fts(rowid, name, content) SELECT rowid, name, content FROM chunks;
";

/// Returns whether `table` has a column named `column`.
pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Returns whether an object named `name` exists in `sqlite_master`.
pub fn object_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Applies the schema and the additive migrations.
///
/// Safe to call on every open: fresh databases get the full schema, older
/// databases gain the `file_mtime` and `domain` columns and the lexical
/// index (backfilled when chunks already exist).
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Additive column migrations for pre-existing chunk tables. The
    // columns must exist before their indexes are created below.
    if !table_has_column(conn, "chunks", "file_mtime")? {
        conn.execute_batch("ALTER TABLE chunks ADD COLUMN file_mtime INTEGER;")?;
    }
    if !table_has_column(conn, "chunks", "domain")? {
        conn.execute_batch("ALTER TABLE chunks ADD COLUMN domain TEXT NOT NULL DEFAULT 'code';")?;
    }
    conn.execute_batch(
        r"
        CREATE INDEX IF NOT EXISTS idx_chunks_file_mtime ON chunks(file_mtime);
        CREATE INDEX IF NOT EXISTS idx_chunks_domain ON chunks(domain);
        ",
    )?;

    let had_fts = object_exists(conn, "chunks_fts")?;
    conn.execute_batch(FTS_SQL)?;

    // Backfill when the lexical index is empty but chunks exist; covers both
    // freshly created FTS tables and indexes emptied by a crashed rebuild.
    let fts_rows: i64 = if had_fts {
        conn.query_row("SELECT COUNT(*) FROM chunks_fts", [], |row| row.get(0))?
    } else {
        0
    };
    if fts_rows == 0 {
        let chunk_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        if chunk_rows > 0 {
            conn.execute_batch(FTS_BACKFILL_SQL)?;
        }
    }

    Ok(())
}
