//! Binary embedding codec.
//!
//! Embeddings persist as little-endian IEEE-754 f32 packed arrays, 4 bytes
//! per dimension, no header. Early versions stored JSON arrays instead, so
//! the decoder falls back to JSON when the payload length is not a multiple
//! of four.

use crate::error::{Error, Result};

/// Encodes a vector as packed little-endian f32 bytes.
#[must_use]
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decodes packed little-endian f32 bytes back into a vector.
///
/// Payloads whose length is not a multiple of 4 are retried as legacy
/// JSON-encoded arrays.
///
/// # Errors
///
/// Returns [`Error::InvalidEmbedding`] when neither decoding succeeds.
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 == 0 {
        return Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect());
    }

    // Legacy payload: a JSON array of numbers.
    serde_json::from_slice::<Vec<f32>>(bytes).map_err(|e| Error::InvalidEmbedding {
        message: format!(
            "payload of {} bytes is neither packed f32 nor a JSON array: {e}",
            bytes.len()
        ),
    })
}
