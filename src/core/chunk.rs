//! Chunk and memory-entry records.
//!
//! A [`Chunk`] is the retrievable unit of the engine: a code or documentation
//! fragment with identifying metadata and content. Chunk ids are derived
//! deterministically from identity fields so re-indexing unchanged content
//! produces identical ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default domain assigned to chunks written without one.
pub const DEFAULT_DOMAIN: &str = "code";

/// Kind of code element a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    /// A whole file.
    File,
    /// A free function.
    Function,
    /// A method on a type.
    Method,
    /// A struct definition.
    Struct,
    /// A class definition.
    Class,
    /// An interface or trait definition.
    Interface,
    /// An enum definition.
    Enum,
    /// An unstructured block of lines.
    Block,
    /// Anything else.
    #[default]
    Other,
}

impl ChunkType {
    /// Stable string form used in storage and filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function => "function",
            Self::Method => "method",
            Self::Struct => "struct",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Block => "block",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for ChunkType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "file" => Self::File,
            "function" => Self::Function,
            "method" => Self::Method,
            "struct" => Self::Struct,
            "class" => Self::Class,
            "interface" => Self::Interface,
            "enum" => Self::Enum,
            "block" => Self::Block,
            _ => Self::Other,
        })
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrievable code or documentation fragment.
///
/// Invariants enforced on write: `id` unique within a store,
/// `start_line <= end_line`, `name` present even when `content` is empty,
/// `domain` non-empty (defaulted to [`DEFAULT_DOMAIN`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable, content-derived identifier.
    pub id: String,
    /// Path of the source file, relative to the indexed root.
    pub file_path: String,
    /// Kind of code element.
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    /// Name of the element (function name, struct name, ...).
    pub name: String,
    /// Declaration or signature, when the chunker extracted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Full fragment text.
    pub content: String,
    /// First line of the fragment (1-indexed).
    pub start_line: u32,
    /// Last line of the fragment (1-indexed, inclusive).
    pub end_line: u32,
    /// Source language (e.g. "rust", "go", "markdown").
    pub language: String,
    /// Profile/collection this chunk belongs to.
    #[serde(default)]
    pub domain: String,
    /// Modification time of the source file, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mtime: Option<i64>,
}

impl Chunk {
    /// Creates a chunk with a derived id and the default domain.
    #[must_use]
    pub fn new(
        file_path: impl Into<String>,
        chunk_type: ChunkType,
        name: impl Into<String>,
        content: impl Into<String>,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        let file_path = file_path.into();
        let name = name.into();
        let content = content.into();
        let id = derive_chunk_id(&file_path, chunk_type, &name, start_line, &content);
        Self {
            id,
            file_path,
            chunk_type,
            name,
            signature: None,
            content,
            start_line,
            end_line,
            language: String::new(),
            domain: DEFAULT_DOMAIN.to_string(),
            file_mtime: None,
        }
    }

    /// Sets the language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Sets the signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Sets the domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Sets the source-file mtime.
    #[must_use]
    pub const fn with_file_mtime(mut self, mtime: i64) -> Self {
        self.file_mtime = Some(mtime);
        self
    }

    /// Returns the chunk's domain, defaulting empty domains.
    #[must_use]
    pub fn domain_or_default(&self) -> &str {
        if self.domain.is_empty() {
            DEFAULT_DOMAIN
        } else {
            &self.domain
        }
    }
}

/// Derives the stable chunk id from identity fields.
///
/// Identical inputs always produce identical ids; any change to the file
/// path, element kind, name, position, or content yields a new id.
#[must_use]
pub fn derive_chunk_id(
    file_path: &str,
    chunk_type: ChunkType,
    name: &str,
    start_line: u32,
    content: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update([0]);
    hasher.update(chunk_type.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(name.as_bytes());
    hasher.update([0]);
    hasher.update(start_line.to_le_bytes());
    hasher.update([0]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    // 16 bytes of hex is plenty of id space for a single index.
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Lifecycle state of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    /// Captured but not yet reviewed.
    #[default]
    Pending,
    /// Reviewed and promoted into the curated set.
    Promoted,
}

impl MemoryStatus {
    /// Stable string form used in storage and filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Promoted => "promoted",
        }
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "promoted" => Ok(Self::Promoted),
            _ => Ok(Self::Pending),
        }
    }
}

/// A question/answer memory entry with its own lifecycle, searched with the
/// same similarity semantics as chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique identifier.
    pub id: String,
    /// The question or prompt text.
    pub question: String,
    /// The stored answer.
    pub answer: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Where the entry came from.
    #[serde(default)]
    pub source: String,
    /// Review state.
    #[serde(default)]
    pub status: MemoryStatus,
    /// How many times this entry has been saved.
    #[serde(default)]
    pub occurrences: u32,
    /// Creation time, unix seconds.
    pub created_at: i64,
    /// Last update time, unix seconds.
    pub updated_at: i64,
}
