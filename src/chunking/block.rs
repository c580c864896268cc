//! Plain block chunker.
//!
//! Splits text on blank-line boundaries into blocks of bounded size. Not
//! language-aware; it exists so every supported text file can be indexed
//! even when no semantic chunker is registered for its language.

use std::path::Path;

use crate::Result;
use crate::chunking::Chunker;
use crate::core::{Chunk, ChunkType};

/// Default maximum lines per block.
pub const DEFAULT_MAX_LINES: usize = 60;

const EXTENSIONS: &[&str] = &[
    "rs", "go", "py", "js", "jsx", "ts", "tsx", "java", "c", "h", "cpp", "hpp", "cs", "rb", "php",
    "kt", "swift", "scala", "sh", "sql", "md", "txt", "toml", "yaml", "yml", "json",
];

/// Chunker that groups contiguous non-blank lines into bounded blocks.
#[derive(Debug, Clone, Copy)]
pub struct BlockChunker {
    max_lines: usize,
}

impl Default for BlockChunker {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

impl BlockChunker {
    /// Creates a block chunker with the default block size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a block chunker with a custom maximum block size (minimum 1).
    #[must_use]
    pub const fn with_max_lines(max_lines: usize) -> Self {
        Self {
            max_lines: if max_lines == 0 { 1 } else { max_lines },
        }
    }

    fn language_for(path: &str) -> String {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }

    fn block_name(path: &str, lines: &[&str], start_line: usize) -> String {
        let first = lines
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        if first.is_empty() {
            let stem = Path::new(path)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("block");
            return format!("{stem}:{start_line}");
        }
        first.chars().take(80).collect()
    }
}

impl Chunker for BlockChunker {
    #[allow(clippy::cast_possible_truncation)]
    fn chunk(&self, path: &str, content: &str) -> Result<Vec<Chunk>> {
        let language = Self::language_for(path);
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let mut chunks = Vec::new();
        let mut block_start = 0usize;
        let mut cursor = 0usize;

        while cursor < lines.len() {
            let blank = lines[cursor].trim().is_empty();
            let block_len = cursor - block_start;
            let boundary = blank && block_len > 0;
            let oversized = block_len >= self.max_lines;

            if boundary || oversized {
                let block = &lines[block_start..cursor];
                if block.iter().any(|l| !l.trim().is_empty()) {
                    chunks.push(Self::build_chunk(path, &language, block, block_start));
                }
                // Skip the blank separator; oversized blocks restart in place.
                block_start = if blank { cursor + 1 } else { cursor };
            }
            cursor += 1;
        }

        let block = &lines[block_start..];
        if block.iter().any(|l| !l.trim().is_empty()) {
            chunks.push(Self::build_chunk(path, &language, block, block_start));
        }

        Ok(chunks)
    }

    fn supported_extensions(&self) -> &[&'static str] {
        EXTENSIONS
    }

    fn name(&self) -> &'static str {
        "block"
    }
}

impl BlockChunker {
    #[allow(clippy::cast_possible_truncation)]
    fn build_chunk(path: &str, language: &str, lines: &[&str], start_index: usize) -> Chunk {
        let start_line = (start_index + 1) as u32;
        let end_line = (start_index + lines.len()) as u32;
        let name = Self::block_name(path, lines, start_index + 1);
        Chunk::new(
            path,
            ChunkType::Block,
            name,
            lines.join("\n"),
            start_line,
            end_line,
        )
        .with_language(language)
    }
}
