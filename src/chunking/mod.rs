//! Chunker capability consumed by the index pipeline.
//!
//! Language-aware chunkers (tree-sitter and friends) live outside the core;
//! the pipeline consumes them through the [`Chunker`] trait and an extension
//! registry. A plain block chunker ships with the crate so indexing works on
//! any text file out of the box.

mod block;

pub use block::BlockChunker;

use std::path::Path;
use std::sync::Arc;

use crate::Result;
use crate::core::Chunk;

/// Capability that splits a source file into retrievable chunks.
///
/// Implementations must be `Send + Sync` and deterministic: the same input
/// always produces the same chunks (and therefore the same chunk ids).
pub trait Chunker: Send + Sync {
    /// Splits file content into chunks.
    ///
    /// `path` is the store-relative file path recorded on each chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be chunked.
    fn chunk(&self, path: &str, content: &str) -> Result<Vec<Chunk>>;

    /// File extensions (without the dot) this chunker handles.
    fn supported_extensions(&self) -> &[&'static str];

    /// Name of the chunking strategy.
    fn name(&self) -> &'static str;
}

/// Registry resolving files to chunkers by extension.
///
/// Later registrations win, so hosts can override the built-in block
/// chunker for specific languages.
#[derive(Clone, Default)]
pub struct ChunkerRegistry {
    chunkers: Vec<Arc<dyn Chunker>>,
}

impl ChunkerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in block chunker registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BlockChunker::new()));
        registry
    }

    /// Registers a chunker. Later registrations shadow earlier ones for
    /// overlapping extensions.
    pub fn register(&mut self, chunker: Arc<dyn Chunker>) {
        self.chunkers.push(chunker);
    }

    /// Resolves the chunker for a file path, if any handles its extension.
    #[must_use]
    pub fn chunker_for_path(&self, path: &Path) -> Option<Arc<dyn Chunker>> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.chunkers
            .iter()
            .rev()
            .find(|c| c.supported_extensions().contains(&ext.as_str()))
            .cloned()
    }

    /// All extensions any registered chunker supports.
    #[must_use]
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<&'static str> = self
            .chunkers
            .iter()
            .flat_map(|c| c.supported_extensions().iter().copied())
            .collect();
        extensions.sort_unstable();
        extensions.dedup();
        extensions
    }
}

impl std::fmt::Debug for ChunkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkerRegistry")
            .field(
                "chunkers",
                &self.chunkers.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
