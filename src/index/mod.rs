//! Incremental directory indexing.
//!
//! Walks a root directory, chunks accepted files, batch-embeds each file's
//! chunks, writes them to the store, and records a per-file content hash so
//! unchanged files are skipped on the next run.

mod walker;

use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::chunking::ChunkerRegistry;
use crate::core::{Chunk, IndexOptions, IndexProgress, IndexResult, StoreStats, UpdateResult};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::storage::Storage;
use walker::{FileFilter, collect_files};

/// SHA-256 hex digest of file contents.
#[must_use]
pub fn hash_content(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[allow(clippy::cast_possible_wrap)]
fn file_mtime_unix(path: &Path) -> Option<i64> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

/// Walks, chunks, embeds, and persists a source tree.
pub struct IndexManager {
    store: Arc<dyn Storage>,
    embedder: Arc<dyn Embedder>,
    registry: ChunkerRegistry,
}

impl IndexManager {
    /// Creates an index manager with the default chunker registry.
    #[must_use]
    pub fn new(store: Arc<dyn Storage>, embedder: Arc<dyn Embedder>) -> Self {
        Self::with_registry(store, embedder, ChunkerRegistry::with_defaults())
    }

    /// Creates an index manager with a caller-provided chunker registry.
    #[must_use]
    pub fn with_registry(
        store: Arc<dyn Storage>,
        embedder: Arc<dyn Embedder>,
        registry: ChunkerRegistry,
    ) -> Self {
        Self {
            store,
            embedder,
            registry,
        }
    }

    /// Indexes a directory tree.
    ///
    /// With `force` the store is cleared first and every file re-indexed;
    /// otherwise files whose SHA-256 content hash matches the recorded one
    /// are skipped. Per-file failures are recorded in the result's `errors`
    /// and the walk continues. The per-file content hash is written only
    /// after all of that file's chunks were stored.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when `root_path` is not a directory; `Cancelled` when
    /// the token trips between files; store clear failures propagate.
    pub fn index(
        &self,
        root_path: &Path,
        options: &IndexOptions,
        token: &CancelToken,
    ) -> Result<IndexResult> {
        if !root_path.is_dir() {
            return Err(Error::invalid_input(format!(
                "root path is not a directory: {}",
                root_path.display()
            )));
        }

        if options.force {
            self.store.clear()?;
        }

        let filter = FileFilter::new(&options.includes, &options.excludes, options.exclude_tests)?;
        let files = collect_files(root_path, &filter, &self.registry)?;
        let total = files.len();

        let mut outcome = IndexResult::default();

        for (position, rel) in files.iter().enumerate() {
            token.check("indexing")?;

            let rel_str = rel.to_string_lossy().into_owned();
            let absolute = root_path.join(rel);

            let bytes = match std::fs::read(&absolute) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file = %rel_str, error = %e, "failed to read file");
                    outcome.errors.push(format!("{rel_str}: {e}"));
                    outcome.files_skipped += 1;
                    continue;
                }
            };
            let content_hash = hash_content(&bytes);

            if !options.force
                && self.store.get_file_hash(&rel_str)?.as_deref() == Some(content_hash.as_str())
            {
                outcome.files_unchanged += 1;
                Self::report(options, position, total, &rel_str, outcome.chunks_created, true);
                continue;
            }

            match self.index_file(&rel_str, &absolute, &bytes, options, token) {
                Ok(chunk_count) => {
                    self.store.set_file_hash(&rel_str, &content_hash)?;
                    outcome.files_processed += 1;
                    outcome.chunks_created += chunk_count;
                }
                Err(e @ Error::Cancelled { .. }) => return Err(e),
                Err(e) => {
                    warn!(file = %rel_str, error = %e, "failed to index file");
                    outcome.errors.push(format!("{rel_str}: {e}"));
                    outcome.files_skipped += 1;
                }
            }
            Self::report(options, position, total, &rel_str, outcome.chunks_created, false);
        }

        Ok(outcome)
    }

    /// Chunks, embeds, and stores one file; returns the chunk count.
    fn index_file(
        &self,
        rel_str: &str,
        absolute: &Path,
        bytes: &[u8],
        options: &IndexOptions,
        token: &CancelToken,
    ) -> Result<usize> {
        let chunker = self
            .registry
            .chunker_for_path(absolute)
            .ok_or_else(|| Error::Chunking(format!("no chunker for {rel_str}")))?;

        let content = String::from_utf8_lossy(bytes);
        let mut chunks = chunker.chunk(rel_str, &content)?;
        if chunks.is_empty() {
            // Still replaces any stale chunks from a previous version.
            self.store.delete_by_file_path(rel_str)?;
            return Ok(0);
        }

        let mtime = file_mtime_unix(absolute);
        if let Some(mtime) = mtime {
            for chunk in &mut chunks {
                chunk.file_mtime = Some(mtime);
            }
        }

        let items = self.embed_chunks(chunks, options, token)?;

        // Replace-then-write keeps re-indexed files free of stale chunks.
        self.store.delete_by_file_path(rel_str)?;
        let count = items.len();
        self.store.create_batch(&items)?;
        debug!(file = %rel_str, chunks = count, "indexed file");
        Ok(count)
    }

    /// Embeds a file's chunks, optionally sharding the batch across a
    /// bounded pool.
    fn embed_chunks(
        &self,
        chunks: Vec<Chunk>,
        options: &IndexOptions,
        token: &CancelToken,
    ) -> Result<Vec<(Chunk, Vec<f32>)>> {
        let batch_size = if options.batch_size == 0 {
            chunks.len()
        } else {
            options.batch_size
        };

        let shards: Vec<&[Chunk]> = chunks.chunks(batch_size.max(1)).collect();

        let embed_shard = |shard: &&[Chunk]| -> Result<Vec<Vec<f32>>> {
            token.check("embedding batch")?;
            let texts: Vec<&str> = shard.iter().map(|c| c.content.as_str()).collect();
            self.embedder.embed_batch(&texts)
        };

        let shard_embeddings: Vec<Result<Vec<Vec<f32>>>> =
            if options.parallel > 1 && shards.len() > 1 {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(options.parallel)
                    .build()
                    .map_err(|e| Error::Embedding(format!("embed pool: {e}")))?;
                pool.install(|| shards.par_iter().map(embed_shard).collect())
            } else {
                shards.iter().map(embed_shard).collect()
            };

        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for shard in shard_embeddings {
            embeddings.extend(shard?);
        }
        if embeddings.len() != chunks.len() {
            return Err(Error::Embedding(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        Ok(chunks.into_iter().zip(embeddings).collect())
    }

    fn report(
        options: &IndexOptions,
        position: usize,
        total: usize,
        file_path: &str,
        chunks_total_so_far: usize,
        skipped: bool,
    ) {
        if let Some(callback) = &options.on_progress {
            callback(&IndexProgress {
                current: position + 1,
                total,
                file_path: file_path.to_string(),
                chunks_total_so_far,
                skipped,
            });
        }
    }

    /// Re-indexes changed files and removes chunks for deleted ones.
    ///
    /// # Errors
    ///
    /// Same conditions as [`IndexManager::index`].
    pub fn update(
        &self,
        root_path: &Path,
        options: &IndexOptions,
        token: &CancelToken,
    ) -> Result<UpdateResult> {
        if !root_path.is_dir() {
            return Err(Error::invalid_input(format!(
                "root path is not a directory: {}",
                root_path.display()
            )));
        }

        let previously_indexed = self.store.list_file_hashes()?;

        let filter = FileFilter::new(&options.includes, &options.excludes, options.exclude_tests)?;
        let files = collect_files(root_path, &filter, &self.registry)?;
        let current: std::collections::HashSet<String> = files
            .iter()
            .map(|rel| rel.to_string_lossy().into_owned())
            .collect();

        let mut outcome = UpdateResult::default();

        for rel in &files {
            token.check("index update")?;
            let rel_str = rel.to_string_lossy().into_owned();
            let absolute = root_path.join(rel);

            let bytes = match std::fs::read(&absolute) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file = %rel_str, error = %e, "failed to read file during update");
                    continue;
                }
            };
            let content_hash = hash_content(&bytes);
            if self.store.get_file_hash(&rel_str)?.as_deref() == Some(content_hash.as_str()) {
                continue;
            }

            outcome.chunks_removed += self.store.delete_by_file_path(&rel_str)?;
            match self.index_file(&rel_str, &absolute, &bytes, options, token) {
                Ok(chunk_count) => {
                    self.store.set_file_hash(&rel_str, &content_hash)?;
                    outcome.files_updated += 1;
                    outcome.chunks_created += chunk_count;
                }
                Err(e @ Error::Cancelled { .. }) => return Err(e),
                Err(e) => {
                    warn!(file = %rel_str, error = %e, "failed to re-index file");
                }
            }
        }

        for stale in previously_indexed
            .into_iter()
            .filter(|path| !current.contains(path))
        {
            token.check("index update")?;
            outcome.chunks_removed += self.store.delete_by_file_path(&stale)?;
            self.store.delete_file_hash(&stale)?;
            outcome.files_removed += 1;
        }

        Ok(outcome)
    }

    /// Store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store queries fail.
    pub fn status(&self) -> Result<StoreStats> {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::embedding::HashEmbedder;
    use crate::storage::SqliteStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> (IndexManager, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let embedder = Arc::new(HashEmbedder::new(32));
        (
            IndexManager::new(store.clone() as Arc<dyn Storage>, embedder),
            store,
        )
    }

    fn write_tree(dir: &Path) {
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(
            dir.join("src/alpha.rs"),
            "fn alpha() {\n    body();\n}\n\nfn alpha_two() {}\n",
        )
        .unwrap();
        std::fs::write(dir.join("src/beta.rs"), "fn beta() {}\n").unwrap();
    }

    #[test]
    fn test_hash_content_stable() {
        assert_eq!(hash_content(b"abc"), hash_content(b"abc"));
        assert_ne!(hash_content(b"abc"), hash_content(b"abd"));
        assert_eq!(hash_content(b"abc").len(), 64);
    }

    #[test]
    fn test_index_rejects_non_directory() {
        let (manager, _) = manager();
        let err = manager
            .index(Path::new("/definitely/not/here"), &IndexOptions::default(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_index_then_resume_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, store) = manager();

        let first = manager
            .index(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(first.files_processed, 2);
        assert_eq!(first.files_unchanged, 0);
        assert!(first.chunks_created >= 2);
        assert!(first.errors.is_empty());

        let second = manager
            .index(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(second.files_processed, 0);
        assert_eq!(second.files_unchanged, 2);
        assert_eq!(second.chunks_created, 0);

        // Hashes are recorded per file.
        assert_eq!(store.list_file_hashes().unwrap().len(), 2);
    }

    #[test]
    fn test_index_detects_modification() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, _) = manager();

        manager
            .index(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();

        std::fs::write(dir.path().join("src/beta.rs"), "fn beta() { changed(); }\n").unwrap();
        let rerun = manager
            .index(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(rerun.files_processed, 1);
        assert_eq!(rerun.files_unchanged, 1);
    }

    #[test]
    fn test_force_reindexes_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, _) = manager();

        manager
            .index(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();
        let forced = manager
            .index(
                dir.path(),
                &IndexOptions {
                    force: true,
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(forced.files_processed, 2);
        assert_eq!(forced.files_unchanged, 0);
    }

    #[test]
    fn test_progress_callback_once_per_file() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, _) = manager();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = calls.clone();
        let options = IndexOptions {
            on_progress: Some(Box::new(move |progress| {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                assert!(progress.current >= 1 && progress.current <= progress.total);
                assert!(!progress.file_path.is_empty());
            })),
            ..Default::default()
        };
        manager.index(dir.path(), &options, &CancelToken::new()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_indexed_chunks_carry_mtime_and_domain() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, store) = manager();
        manager
            .index(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();

        let chunks = store.list(&crate::core::ListOptions::default()).unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.file_mtime.is_some()));
        assert!(chunks.iter().all(|c| c.domain == "code"));
    }

    #[test]
    fn test_cancellation_stops_walk() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, _) = manager();
        let token = CancelToken::new();
        token.cancel();
        let err = manager
            .index(dir.path(), &IndexOptions::default(), &token)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_update_reindexes_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, store) = manager();

        manager
            .index(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();

        // No changes: nothing to do.
        let unchanged = manager
            .update(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(unchanged.files_updated, 0);
        assert_eq!(unchanged.files_removed, 0);

        // Modify one file, delete the other.
        std::fs::write(dir.path().join("src/alpha.rs"), "fn alpha() { new(); }\n").unwrap();
        std::fs::remove_file(dir.path().join("src/beta.rs")).unwrap();

        let update = manager
            .update(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(update.files_updated, 1);
        assert_eq!(update.files_removed, 1);
        assert!(update.chunks_created >= 1);
        assert!(update.chunks_removed >= 1);

        // The removed file's chunks and hash are gone.
        let remaining = store.list(&crate::core::ListOptions::default()).unwrap();
        assert!(remaining.iter().all(|c| c.file_path != "src/beta.rs"));
        assert!(store.get_file_hash("src/beta.rs").unwrap().is_none());
    }

    #[test]
    fn test_update_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, _) = manager();
        manager
            .index(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();

        std::fs::write(dir.path().join("src/gamma.rs"), "fn gamma() {}\n").unwrap();
        let update = manager
            .update(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(update.files_updated, 1);
    }

    #[test]
    fn test_status_reflects_store() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, _) = manager();
        manager
            .index(dir.path(), &IndexOptions::default(), &CancelToken::new())
            .unwrap();
        let stats = manager.status().unwrap();
        assert_eq!(stats.files_indexed, 2);
        assert!(stats.chunks_total >= 2);
    }

    #[test]
    fn test_batch_and_parallel_options() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let (manager, _) = manager();
        let outcome = manager
            .index(
                dir.path(),
                &IndexOptions {
                    batch_size: 1,
                    parallel: 2,
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(outcome.files_processed, 2);
        assert!(outcome.errors.is_empty());
    }
}
