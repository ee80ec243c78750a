//! Binary (frozen tier) codec: one bit per dimension.
//!
//! Encoding is sign-against-threshold; decoding is not a faithful
//! reconstruction, only similarity-preserving for sign-based cosine.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-dimension thresholds trained from sample vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryCodec {
    /// Threshold per dimension (median of the training sample)
    thresholds: Vec<f32>,
    /// Magnitude emitted for a set/unset bit on decode
    scale: f32,
}

impl BinaryCodec {
    /// Train per-dimension median thresholds from `samples`.
    pub fn train(samples: &[Vec<f32>], dimension: usize) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::Validation(
                "binary codec training requires at least one sample".into(),
            ));
        }
        let mut thresholds = Vec::with_capacity(dimension);
        let mut column = Vec::with_capacity(samples.len());
        for dim in 0..dimension {
            column.clear();
            column.extend(samples.iter().map(|v| v[dim]));
            column.sort_by(|a, b| a.total_cmp(b));
            thresholds.push(column[column.len() / 2]);
        }
        // Unit-magnitude reconstruction: every dimension carries 1/sqrt(D).
        let scale = 1.0 / (dimension as f32).sqrt();
        Ok(Self { thresholds, scale })
    }

    /// Zero thresholds, usable without training.
    #[must_use]
    pub fn zero(dimension: usize) -> Self {
        Self {
            thresholds: vec![0.0; dimension],
            scale: 1.0 / (dimension as f32).sqrt(),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.thresholds.len()
    }

    /// Encode one bit per dimension, packed LSB-first into bytes.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if vector.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }
        let mut data = vec![0u8; vector.len().div_ceil(8)];
        for (dim, value) in vector.iter().enumerate() {
            if *value >= self.thresholds[dim] {
                data[dim / 8] |= 1 << (dim % 8);
            }
        }
        Ok(data)
    }

    /// Decode bits to threshold-sign values of fixed magnitude.
    pub fn decode(&self, data: &[u8], dim: usize) -> Result<Vec<f32>> {
        if dim != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: dim,
            });
        }
        if data.len() != dim.div_ceil(8) {
            return Err(Error::Validation(format!(
                "binary payload is {} bytes, expected {}",
                data.len(),
                dim.div_ceil(8)
            )));
        }
        let mut vector = Vec::with_capacity(dim);
        for i in 0..dim {
            let bit = (data[i / 8] >> (i % 8)) & 1;
            vector.push(if bit == 1 { self.scale } else { -self.scale });
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{dot, magnitude};

    #[test]
    fn encodes_one_bit_per_dimension() {
        let codec = BinaryCodec::zero(16);
        let v: Vec<f32> = (0..16).map(|i| if i % 2 == 0 { 0.25 } else { -0.25 }).collect();
        let data = codec.encode(&v).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0], 0b0101_0101);
    }

    #[test]
    fn decoded_vector_has_unit_magnitude() {
        let codec = BinaryCodec::zero(64);
        let v = vec![0.125; 64];
        let decoded = codec.decode(&codec.encode(&v).unwrap(), 64).unwrap();
        assert!((magnitude(&decoded) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn sign_agreement_preserves_orientation() {
        let codec = BinaryCodec::zero(8);
        let v = vec![0.5, -0.5, 0.5, -0.5, 0.5, -0.5, 0.5, -0.5];
        let decoded = codec.decode(&codec.encode(&v).unwrap(), 8).unwrap();
        // Same sign pattern means positive cosine with the original.
        assert!(dot(&v, &decoded) > 0.0);
    }

    #[test]
    fn median_thresholds_split_the_sample() {
        let samples = vec![vec![0.0, 10.0], vec![1.0, 20.0], vec![2.0, 30.0]];
        let codec = BinaryCodec::train(&samples, 2).unwrap();
        let bits = codec.encode(&[1.5, 15.0]).unwrap();
        assert_eq!(bits[0] & 1, 1); // 1.5 >= median 1.0
        assert_eq!((bits[0] >> 1) & 1, 0); // 15.0 < median 20.0
    }
}
