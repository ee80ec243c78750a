//! Product quantization: codebook training and the PQ8/PQ4 codecs.
//!
//! A codebook is trained per subvector with k-means over a sample of
//! stored vectors. PQ8 emits one byte per subvector; PQ4 packs two
//! 4-bit codes per byte, low nibble first.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::vector::squared_euclidean;

/// Default number of subvectors a vector is split into.
pub const DEFAULT_NUM_SUBVECTORS: usize = 96;

/// Default k-means iteration count.
pub const DEFAULT_KMEANS_ITERATIONS: usize = 10;

/// Minimum number of training samples required before codebooks train.
pub const MIN_TRAINING_SAMPLES: usize = 100;

/// Centroid count for the 8-bit code space.
pub const PQ8_CENTROIDS: usize = 256;

/// Centroid count for the 4-bit code space.
pub const PQ4_CENTROIDS: usize = 16;

/// Training knobs for product quantization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqConfig {
    /// Subvector count; `dimension % num_subvectors` must be 0
    pub num_subvectors: usize,
    /// K-means iterations per subvector
    pub iterations: usize,
    /// Minimum training-set size
    pub min_samples: usize,
    /// Seed for centroid initialization (fixed seed gives reproducible codebooks)
    pub seed: Option<u64>,
}

impl Default for PqConfig {
    fn default() -> Self {
        Self {
            num_subvectors: DEFAULT_NUM_SUBVECTORS,
            iterations: DEFAULT_KMEANS_ITERATIONS,
            min_samples: MIN_TRAINING_SAMPLES,
            seed: None,
        }
    }
}

/// Trained per-subvector centroids for one code width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebook {
    /// Subvector count the codebook was trained for
    pub num_subvectors: usize,
    /// Elements per subvector
    pub subvector_dim: usize,
    /// Centroids per subvector (256 for PQ8, 16 for PQ4)
    pub num_centroids: usize,
    /// `centroids[sub][centroid]` is a `subvector_dim`-element vector
    centroids: Vec<Vec<Vec<f32>>>,
    /// Monotonic generation tag, stamped into encoded entries
    pub generation: u32,
}

impl Codebook {
    /// Train a codebook with k-means over `samples`.
    ///
    /// Each subvector trains independently: centroids start as random
    /// samples from the training set, then `iterations` rounds of
    /// assign-and-recompute. Empty clusters keep their previous centroid.
    pub fn train(
        samples: &[Vec<f32>],
        dimension: usize,
        num_centroids: usize,
        config: &PqConfig,
        generation: u32,
    ) -> Result<Self> {
        if samples.len() < config.min_samples {
            return Err(Error::Validation(format!(
                "PQ training needs at least {} samples, got {}",
                config.min_samples,
                samples.len()
            )));
        }
        if dimension % config.num_subvectors != 0 {
            return Err(Error::Validation(format!(
                "dimension {dimension} is not divisible into {} subvectors",
                config.num_subvectors
            )));
        }
        let subvector_dim = dimension / config.num_subvectors;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::try_from_rng(&mut rand::rngs::SysRng).expect("failed to seed RNG from OS randomness"),
        };

        let mut centroids = Vec::with_capacity(config.num_subvectors);
        for sub in 0..config.num_subvectors {
            let offset = sub * subvector_dim;
            let slices: Vec<&[f32]> = samples
                .iter()
                .map(|v| &v[offset..offset + subvector_dim])
                .collect();
            centroids.push(kmeans(&slices, num_centroids, config.iterations, &mut rng));
        }

        debug!(
            subvectors = config.num_subvectors,
            centroids = num_centroids,
            samples = samples.len(),
            generation,
            "trained PQ codebook"
        );

        Ok(Self {
            num_subvectors: config.num_subvectors,
            subvector_dim,
            num_centroids,
            centroids,
            generation,
        })
    }

    fn dimension(&self) -> usize {
        self.num_subvectors * self.subvector_dim
    }

    fn check_dimension(&self, dim: usize) -> Result<()> {
        if dim != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: dim,
            });
        }
        Ok(())
    }

    /// Nearest-centroid code for each subvector.
    fn codes_for(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.check_dimension(vector.len())?;
        let mut codes = Vec::with_capacity(self.num_subvectors);
        for (sub, sub_centroids) in self.centroids.iter().enumerate() {
            let offset = sub * self.subvector_dim;
            let slice = &vector[offset..offset + self.subvector_dim];
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for (idx, centroid) in sub_centroids.iter().enumerate() {
                let dist = squared_euclidean(slice, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = idx;
                }
            }
            codes.push(best as u8);
        }
        Ok(codes)
    }

    /// Encode with one byte per subvector code (PQ8).
    pub fn encode_pq8(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.codes_for(vector)
    }

    /// Decode PQ8 codes by concatenating looked-up centroids.
    pub fn decode_pq8(&self, data: &[u8]) -> Result<Vec<f32>> {
        if data.len() != self.num_subvectors {
            return Err(Error::Validation(format!(
                "PQ8 payload is {} codes, expected {}",
                data.len(),
                self.num_subvectors
            )));
        }
        let mut vector = Vec::with_capacity(self.dimension());
        for (sub, &code) in data.iter().enumerate() {
            let centroid = self.centroids[sub]
                .get(code as usize)
                .ok_or_else(|| Error::Validation(format!("PQ8 code {code} out of range")))?;
            vector.extend_from_slice(centroid);
        }
        Ok(vector)
    }

    /// Encode with one nibble per subvector code, two subvectors per byte.
    pub fn encode_pq4(&self, vector: &[f32]) -> Result<Vec<u8>> {
        let codes = self.codes_for(vector)?;
        let mut data = Vec::with_capacity(codes.len().div_ceil(2));
        for pair in codes.chunks(2) {
            let low = pair[0] & 0x0F;
            let high = pair.get(1).copied().unwrap_or(0) & 0x0F;
            data.push(low | (high << 4));
        }
        Ok(data)
    }

    /// Decode nibble-packed PQ4 codes.
    pub fn decode_pq4(&self, data: &[u8]) -> Result<Vec<f32>> {
        let expected = self.num_subvectors.div_ceil(2);
        if data.len() != expected {
            return Err(Error::Validation(format!(
                "PQ4 payload is {} bytes, expected {expected}",
                data.len()
            )));
        }
        let mut vector = Vec::with_capacity(self.dimension());
        for sub in 0..self.num_subvectors {
            let byte = data[sub / 2];
            let code = if sub % 2 == 0 { byte & 0x0F } else { byte >> 4 };
            let centroid = self.centroids[sub]
                .get(code as usize)
                .ok_or_else(|| Error::Validation(format!("PQ4 code {code} out of range")))?;
            vector.extend_from_slice(centroid);
        }
        Ok(vector)
    }
}

/// K-means over subvector slices. Initial centroids are random samples
/// from the training set (with replacement when the set is smaller than
/// the centroid count).
fn kmeans(
    samples: &[&[f32]],
    num_centroids: usize,
    iterations: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dim = samples[0].len();
    let mut centroids: Vec<Vec<f32>> = (0..num_centroids)
        .map(|_| samples[rng.random_range(0..samples.len())].to_vec())
        .collect();

    let mut assignments = vec![0usize; samples.len()];
    for _ in 0..iterations {
        // Assignment step
        for (i, sample) in samples.iter().enumerate() {
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for (idx, centroid) in centroids.iter().enumerate() {
                let dist = squared_euclidean(sample, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = idx;
                }
            }
            assignments[i] = best;
        }

        // Update step
        let mut sums = vec![vec![0.0f32; dim]; num_centroids];
        let mut counts = vec![0usize; num_centroids];
        for (sample, &cluster) in samples.iter().zip(assignments.iter()) {
            counts[cluster] += 1;
            for (acc, value) in sums[cluster].iter_mut().zip(sample.iter()) {
                *acc += value;
            }
        }
        for (idx, count) in counts.iter().enumerate() {
            if *count > 0 {
                for value in &mut sums[idx] {
                    *value /= *count as f32;
                }
                centroids[idx] = std::mem::take(&mut sums[idx]);
            }
        }
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{mean_squared_error, normalize};

    fn sample_set(count: usize, dim: usize) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(42);
        (0..count)
            .map(|_| {
                let mut v: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
                normalize(&mut v);
                v
            })
            .collect()
    }

    fn test_config(num_subvectors: usize) -> PqConfig {
        PqConfig {
            num_subvectors,
            seed: Some(7),
            ..PqConfig::default()
        }
    }

    #[test]
    fn training_requires_min_samples() {
        let samples = sample_set(10, 32);
        let err = Codebook::train(&samples, 32, PQ8_CENTROIDS, &test_config(8), 0);
        assert!(err.is_err());
    }

    #[test]
    fn pq8_round_trip_within_cool_bound() {
        let samples = sample_set(200, 32);
        let codebook =
            Codebook::train(&samples, 32, PQ8_CENTROIDS, &test_config(8), 0).unwrap();
        let codes = codebook.encode_pq8(&samples[0]).unwrap();
        assert_eq!(codes.len(), 8);
        let decoded = codebook.decode_pq8(&codes).unwrap();
        assert!(mean_squared_error(&samples[0], &decoded) <= 0.02);
    }

    #[test]
    fn pq4_codes_pack_two_per_byte() {
        let samples = sample_set(200, 32);
        let codebook =
            Codebook::train(&samples, 32, PQ4_CENTROIDS, &test_config(8), 1).unwrap();
        let data = codebook.encode_pq4(&samples[1]).unwrap();
        assert_eq!(data.len(), 4);
        let decoded = codebook.decode_pq4(&data).unwrap();
        assert_eq!(decoded.len(), 32);
        assert!(mean_squared_error(&samples[1], &decoded) <= 0.05);
    }

    #[test]
    fn pq4_codes_stay_in_nibble_range() {
        let samples = sample_set(150, 16);
        let codebook =
            Codebook::train(&samples, 16, PQ4_CENTROIDS, &test_config(4), 0).unwrap();
        for sample in &samples {
            for byte in codebook.encode_pq4(sample).unwrap() {
                assert!((byte & 0x0F) < 16 && (byte >> 4) < 16);
            }
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let samples = sample_set(120, 32);
        let codebook =
            Codebook::train(&samples, 32, PQ8_CENTROIDS, &test_config(8), 0).unwrap();
        assert!(codebook.encode_pq8(&vec![0.0; 16]).is_err());
    }
}
