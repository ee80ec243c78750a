//! Scalar codecs: float32 passthrough and IEEE binary16.

use half::f16;

use crate::error::{Error, Result};

/// Encode a full-precision vector as little-endian float32 bytes.
#[must_use]
pub fn encode_f32(vector: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Decode little-endian float32 bytes back into a vector.
pub fn decode_f32(data: &[u8], dim: usize) -> Result<Vec<f32>> {
    if data.len() != dim * 4 {
        return Err(Error::Validation(format!(
            "float32 payload is {} bytes, expected {}",
            data.len(),
            dim * 4
        )));
    }
    let mut vector = Vec::with_capacity(dim);
    for chunk in data.chunks_exact(4) {
        vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(vector)
}

/// Encode a vector as IEEE binary16, two bytes per element.
///
/// Max error is ~0.1% on unit-normalized input, well inside the warm
/// tier's reconstruction bound.
#[must_use]
pub fn encode_f16(vector: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(vector.len() * 2);
    for value in vector {
        data.extend_from_slice(&f16::from_f32(*value).to_le_bytes());
    }
    data
}

/// Decode binary16 bytes back into float32.
pub fn decode_f16(data: &[u8], dim: usize) -> Result<Vec<f32>> {
    if data.len() != dim * 2 {
        return Err(Error::Validation(format!(
            "float16 payload is {} bytes, expected {}",
            data.len(),
            dim * 2
        )));
    }
    let mut vector = Vec::with_capacity(dim);
    for chunk in data.chunks_exact(2) {
        vector.push(f16::from_le_bytes([chunk[0], chunk[1]]).to_f32());
    }
    Ok(vector)
}
