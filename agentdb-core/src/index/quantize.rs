//! Per-vector int8 quantization used by the index's optional side-map.

use serde::{Deserialize, Serialize};

/// An int8-quantized vector with its per-vector affine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedVector {
    /// One code per dimension
    pub data: Vec<u8>,
    /// Dequantization scale
    pub scale: f32,
    /// Minimum value of the source vector (the zero point maps here)
    pub min: f32,
}

impl QuantizedVector {
    /// Quantize a vector to u8 codes with per-vector scale and zero point.
    #[must_use]
    pub fn quantize(vector: &[f32]) -> Self {
        let min = vector.iter().copied().fold(f32::INFINITY, f32::min);
        let max = vector.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;
        let scale = if range > 0.0 { range / 255.0 } else { 1.0 };
        let data = vector
            .iter()
            .map(|v| (((v - min) / scale).round().clamp(0.0, 255.0)) as u8)
            .collect();
        Self { data, scale, min }
    }

    /// Approximate reconstruction of the source vector.
    #[must_use]
    pub fn dequantize(&self) -> Vec<f32> {
        self.data
            .iter()
            .map(|&code| self.min + f32::from(code) * self.scale)
            .collect()
    }
}
