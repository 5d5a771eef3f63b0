//! Embedding blob codec.
//!
//! Vectors are stored as packed little-endian `f32` values, four bytes per
//! component, with no header. The dimension is implied by the blob length.

use thiserror::Error;

/// Width of one encoded component in bytes.
pub const F32_WIDTH: usize = std::mem::size_of::<f32>();

/// Errors produced while decoding an embedding blob.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("embedding blob length {len} is not a multiple of {F32_WIDTH}")]
    InvalidLength { len: usize },
}

/// Encode a vector as a packed little-endian blob.
#[must_use]
pub fn serialize(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * F32_WIDTH);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a packed little-endian blob.
///
/// Decoding is bit-exact: NaN payloads and signed zeros survive unchanged.
pub fn deserialize(blob: &[u8]) -> Result<Vec<f32>, CodecError> {
    if blob.len() % F32_WIDTH != 0 {
        return Err(CodecError::InvalidLength { len: blob.len() });
    }
    Ok(blob
        .chunks_exact(F32_WIDTH)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
