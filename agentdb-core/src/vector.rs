//! Vector math helpers shared by the index, codecs, and routing.
//!
//! All stored vectors are L2-normalized by construction, so cosine
//! similarity reduces to a dot product and cosine distance to `1 - dot`.

use crate::error::{Error, Result};

/// Opaque key identifying a stored vector.
pub type VectorId = String;

/// Validate that a vector matches the expected dimension.
pub fn validate_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Dot product of two equal-length vectors.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Squared Euclidean distance between two equal-length vectors.
#[must_use]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// L2 norm of a vector.
#[must_use]
pub fn magnitude(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize a vector to unit length in place. Zero vectors are left as-is.
pub fn normalize(vector: &mut [f32]) {
    let mag = magnitude(vector);
    if mag > 0.0 {
        for x in vector.iter_mut() {
            *x /= mag;
        }
    }
}

/// Calculate cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths, empty input, or zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mag_a = magnitude(a);
    let mag_b = magnitude(b);
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (mag_a * mag_b)
}

/// Cosine distance as used by the index: `1 - dot` on normalized input.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - dot(a, b)
}

/// Mean squared error between two equal-length vectors.
#[must_use]
pub fn mean_squared_error(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    squared_euclidean(a, b) / a.len() as f32
}
