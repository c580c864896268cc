//! Error types for codeseek operations.
//!
//! This module provides the crate-wide error taxonomy using `thiserror` for
//! all retrieval, storage, indexing, and calibration operations. Every error
//! carries a human-readable reason; [`Error::kind`] exposes the programmatic
//! kind so callers can match without destructuring payloads.

use thiserror::Error;

/// Result type alias for codeseek operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Programmatic error kind, stable across payload changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Caller passed an invalid argument.
    InvalidInput,
    /// A chunk or memory entry was not found.
    NotFound,
    /// Operation against a closed store.
    StorageClosed,
    /// A multi-profile request named an absent profile.
    UnknownProfile,
    /// Vector length differs from the store's configured dimension.
    DimensionMismatch,
    /// Stored embedding bytes could not be decoded.
    InvalidEmbedding,
    /// Malformed full-text query.
    LexicalSyntax,
    /// Calibration attempted on a store with zero chunks.
    EmptyIndex,
    /// Operation was cancelled.
    Cancelled,
    /// Every branch of a multi-profile query failed.
    AllProfilesFailed,
    /// Backing storage failure.
    Storage,
    /// Embedding provider failure.
    Embedding,
    /// Chunking failure.
    Chunking,
    /// Filesystem failure.
    Io,
    /// Serialization failure.
    Serialization,
}

/// Error type for all codeseek operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Caller passed an invalid argument (empty query, out-of-range
    /// threshold, bad fusion parameter, too many queries, ...).
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what was invalid.
        message: String,
    },

    /// A chunk or memory entry was not found by id.
    #[error("not found: {id}")]
    NotFound {
        /// Identifier that was not found.
        id: String,
    },

    /// Operation attempted against a store that has been closed.
    #[error("storage is closed")]
    StorageClosed,

    /// A multi-profile request named a profile that is not registered.
    #[error("unknown profile: {profile}")]
    UnknownProfile {
        /// The absent profile name.
        profile: String,
    },

    /// A vector's length differs from the store's configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the store was configured with.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// Stored embedding bytes could not be decoded, and the JSON-array
    /// fallback also failed.
    #[error("invalid embedding: {message}")]
    InvalidEmbedding {
        /// Description of the decode failure.
        message: String,
    },

    /// Malformed full-text query. Distinct from internal storage errors so
    /// callers can sanitize and retry.
    #[error("lexical query syntax error: {message}")]
    LexicalSyntax {
        /// Original error message from the full-text engine.
        message: String,
    },

    /// Calibration attempted on a store with zero chunks.
    #[error("index is empty; nothing to calibrate")]
    EmptyIndex,

    /// Operation was cancelled via its cancellation token.
    #[error("operation cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// Every branch of a multi-profile query failed.
    #[error("all profiles failed: {detail}")]
    AllProfilesFailed {
        /// Joined per-profile failure messages.
        detail: String,
    },

    /// Backing storage failure (database operations).
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Chunking failure.
    #[error("chunking error: {0}")]
    Chunking(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns the programmatic kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::StorageClosed => ErrorKind::StorageClosed,
            Self::UnknownProfile { .. } => ErrorKind::UnknownProfile,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::InvalidEmbedding { .. } => ErrorKind::InvalidEmbedding,
            Self::LexicalSyntax { .. } => ErrorKind::LexicalSyntax,
            Self::EmptyIndex => ErrorKind::EmptyIndex,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::AllProfilesFailed { .. } => ErrorKind::AllProfilesFailed,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Embedding(_) => ErrorKind::Embedding,
            Self::Chunking(_) => ErrorKind::Chunking,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Convenience constructor for [`Error::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Convenience constructor for [`Error::Cancelled`].
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        // FTS5 reports malformed MATCH expressions as generic SQLite errors;
        // surface them under the dedicated lexical-syntax kind.
        let message = err.to_string();
        if message.contains("fts5: syntax error") || message.contains("unknown special query") {
            Self::LexicalSyntax { message }
        } else {
            Self::Storage(message)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
