//! Tiered vector store: heat-tracked, one-way compression lifecycle.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::binary::BinaryCodec;
use super::codec;
use super::heat::{AccessRecord, DEFAULT_DECAY_RATE};
use super::pq::{Codebook, PqConfig, PQ4_CENTROIDS, PQ8_CENTROIDS};
use super::tier::{CompressedEmbedding, Tier};
use crate::error::{Error, Result};
use crate::vector::{mean_squared_error, validate_dimension};

/// Upper bound on retained training samples.
const TRAINING_BUFFER_CAP: usize = 2048;

/// Configuration for the compression manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Vector dimension
    pub dimension: usize,
    /// Heat decay rate per idle hour
    pub decay_rate: f64,
    /// Keep original vectors for reconstruction-error measurement
    pub retain_originals: bool,
    /// Product-quantization training knobs
    pub pq: PqConfig,
    /// Auto-transition scheduler period
    pub auto_transition_interval: Duration,
}

impl CompressionConfig {
    /// Defaults for a given dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            decay_rate: DEFAULT_DECAY_RATE,
            retain_originals: false,
            pq: PqConfig::default(),
            auto_transition_interval: Duration::from_secs(3600),
        }
    }

    /// Encoded payload size for a tier at this configuration.
    #[must_use]
    pub fn bytes_per_vector(&self, tier: Tier) -> usize {
        match tier {
            Tier::Hot => self.dimension * 4,
            Tier::Warm => self.dimension * 2,
            Tier::Cool => self.pq.num_subvectors,
            Tier::Cold => self.pq.num_subvectors.div_ceil(2),
            Tier::Frozen => self.dimension.div_ceil(8),
        }
    }
}

/// A tier transition observed by `check_transitions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTransition {
    pub vector_id: String,
    pub from: Tier,
    pub to: Tier,
}

/// Aggregate view of the store, for health and metrics surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub vector_count: usize,
    pub tier_counts: HashMap<String, usize>,
    pub compressed_bytes: usize,
    pub uncompressed_bytes: usize,
    pub codebooks_trained: bool,
    pub codebook_generation: u32,
}

/// Owns compressed embeddings, access records, and trained codebooks.
pub struct CompressionManager {
    config: CompressionConfig,
    entries: HashMap<String, CompressedEmbedding>,
    access: HashMap<String, AccessRecord>,
    /// Originals kept only when `retain_originals` is set
    originals: HashMap<String, Vec<f32>>,
    training_buffer: Vec<Vec<f32>>,
    pq8: Option<Codebook>,
    pq4: Option<Codebook>,
    binary: Option<BinaryCodec>,
    codebook_generation: u32,
}

impl CompressionManager {
    #[must_use]
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            access: HashMap::new(),
            originals: HashMap::new(),
            training_buffer: Vec::new(),
            pq8: None,
            pq4: None,
            binary: None,
            codebook_generation: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, vector_id: &str) -> bool {
        self.entries.contains_key(vector_id)
    }

    #[must_use]
    pub fn tier_of(&self, vector_id: &str) -> Option<Tier> {
        self.entries.get(vector_id).map(|e| e.tier)
    }

    /// Store a vector at the hot tier with full heat.
    pub fn store(&mut self, vector_id: &str, vector: Vec<f32>) -> Result<()> {
        self.store_at(vector_id, vector, Utc::now())
    }

    /// Clock-injectable variant of [`store`](Self::store).
    pub fn store_at(
        &mut self,
        vector_id: &str,
        vector: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_dimension(&vector, self.config.dimension)?;

        if self.training_buffer.len() < TRAINING_BUFFER_CAP {
            self.training_buffer.push(vector.clone());
        }
        if self.config.retain_originals {
            self.originals.insert(vector_id.to_string(), vector.clone());
        }

        let entry = CompressedEmbedding {
            vector_id: vector_id.to_string(),
            tier: Tier::Hot,
            data: codec::encode_f32(&vector),
            original_dim: vector.len(),
            compressed_at: now.timestamp_millis(),
            codebook_index: None,
        };
        self.entries.insert(vector_id.to_string(), entry);
        self.access
            .insert(vector_id.to_string(), AccessRecord::new(now));
        Ok(())
    }

    /// Retrieve and decode a vector, updating its access record.
    ///
    /// Returns `None` when the id is absent.
    pub fn retrieve(&mut self, vector_id: &str) -> Result<Option<Vec<f32>>> {
        self.retrieve_at(vector_id, Utc::now())
    }

    /// Clock-injectable variant of [`retrieve`](Self::retrieve).
    pub fn retrieve_at(
        &mut self,
        vector_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<f32>>> {
        let Some(entry) = self.entries.get(vector_id) else {
            return Ok(None);
        };
        let vector = self.decode(entry)?;
        if let Some(record) = self.access.get_mut(vector_id) {
            record.touch(now, self.config.decay_rate);
        }
        Ok(Some(vector))
    }

    /// Decode without touching the access record (internal reads).
    pub fn peek(&self, vector_id: &str) -> Result<Option<Vec<f32>>> {
        match self.entries.get(vector_id) {
            Some(entry) => Ok(Some(self.decode(entry)?)),
            None => Ok(None),
        }
    }

    /// Remove a vector and its bookkeeping.
    pub fn remove(&mut self, vector_id: &str) -> bool {
        self.access.remove(vector_id);
        self.originals.remove(vector_id);
        self.entries.remove(vector_id).is_some()
    }

    /// Current heat score for a vector, if tracked.
    #[must_use]
    pub fn heat_of(&self, vector_id: &str) -> Option<f64> {
        self.access.get(vector_id).map(|r| r.heat_score)
    }

    /// Last access time for a vector, if tracked.
    #[must_use]
    pub fn last_access_of(&self, vector_id: &str) -> Option<DateTime<Utc>> {
        self.access.get(vector_id).map(|r| r.last_access_at)
    }

    /// Move a vector to a strictly later tier.
    pub fn transition_tier(&mut self, vector_id: &str, target: Tier) -> Result<()> {
        let entry = self
            .entries
            .get(vector_id)
            .ok_or_else(|| Error::NotFound(vector_id.to_string()))?;
        if !entry.tier.can_transition_to(target) {
            return Err(Error::InvalidTier {
                from: entry.tier,
                to: target,
            });
        }

        let vector = self.decode(entry)?;
        let (data, codebook_index) = self.encode_for(target, &vector)?;

        if let Some(original) = self.originals.get(vector_id) {
            let decoded = self.decode_raw(target, &data, original.len(), codebook_index)?;
            let mse = mean_squared_error(original, &decoded);
            if mse > target.max_reconstruction_error() {
                warn!(
                    vector_id,
                    tier = %target,
                    mse,
                    bound = target.max_reconstruction_error(),
                    "reconstruction error above tier bound"
                );
            }
        }

        let entry = self
            .entries
            .get_mut(vector_id)
            .ok_or_else(|| Error::NotFound(vector_id.to_string()))?;
        let from = entry.tier;
        entry.tier = target;
        entry.data = data;
        entry.compressed_at = Utc::now().timestamp_millis();
        entry.codebook_index = codebook_index;
        debug!(vector_id, %from, to = %target, "tier transition");
        Ok(())
    }

    /// Demote every vector whose heat band sits below its current tier.
    ///
    /// Transitions whose codec is untrained are skipped silently.
    pub fn check_transitions(&mut self) -> Vec<TierTransition> {
        let ids: Vec<(String, Tier, Tier)> = self
            .access
            .iter()
            .filter_map(|(id, record)| {
                let current = self.entries.get(id)?.tier;
                let target = Tier::for_heat(record.heat_score);
                (target > current).then(|| (id.clone(), current, target))
            })
            .collect();

        let mut applied = Vec::new();
        for (id, from, to) in ids {
            if !self.codec_ready(to) {
                debug!(vector_id = %id, tier = %to, "codec not trained, skipping transition");
                continue;
            }
            match self.transition_tier(&id, to) {
                Ok(()) => applied.push(TierTransition {
                    vector_id: id,
                    from,
                    to,
                }),
                Err(err) => warn!(vector_id = %id, %err, "tier transition failed"),
            }
        }
        applied
    }

    /// Recompute heat for every record as of `now`.
    pub fn decay_heat_at(&mut self, now: DateTime<Utc>) {
        for record in self.access.values_mut() {
            record.decay(now, self.config.decay_rate);
        }
    }

    /// Recompute heat for every record as of the current time.
    pub fn decay_heat(&mut self) {
        self.decay_heat_at(Utc::now());
    }

    /// Whether enough samples are buffered for training.
    #[must_use]
    pub fn ready_to_train(&self) -> bool {
        self.training_buffer.len() >= self.config.pq.min_samples
    }

    /// Whether all lossy codecs have been trained.
    #[must_use]
    pub fn codebooks_trained(&self) -> bool {
        self.pq8.is_some() && self.pq4.is_some() && self.binary.is_some()
    }

    /// Train PQ8, PQ4, and binary codecs from the buffered samples.
    pub fn train_codebooks(&mut self) -> Result<()> {
        let generation = self.codebook_generation + 1;
        let pq8 = Codebook::train(
            &self.training_buffer,
            self.config.dimension,
            PQ8_CENTROIDS,
            &self.config.pq,
            generation,
        )?;
        let pq4 = Codebook::train(
            &self.training_buffer,
            self.config.dimension,
            PQ4_CENTROIDS,
            &self.config.pq,
            generation,
        )?;
        let binary = BinaryCodec::train(&self.training_buffer, self.config.dimension)?;

        self.pq8 = Some(pq8);
        self.pq4 = Some(pq4);
        self.binary = Some(binary);
        self.codebook_generation = generation;
        info!(
            generation,
            samples = self.training_buffer.len(),
            "codebooks trained"
        );
        Ok(())
    }

    /// Aggregate stats for health and metrics surfaces.
    #[must_use]
    pub fn stats(&self) -> CompressionStats {
        let mut tier_counts: HashMap<String, usize> = HashMap::new();
        let mut compressed_bytes = 0usize;
        for entry in self.entries.values() {
            *tier_counts.entry(entry.tier.to_string()).or_default() += 1;
            compressed_bytes += entry.data.len();
        }
        CompressionStats {
            vector_count: self.entries.len(),
            tier_counts,
            compressed_bytes,
            uncompressed_bytes: self.entries.len() * self.config.dimension * 4,
            codebooks_trained: self.codebooks_trained(),
            codebook_generation: self.codebook_generation,
        }
    }

    /// Evict a fraction of vectors, coldest first. Returns evicted count.
    pub fn evict_fraction(&mut self, fraction: f64) -> usize {
        let target = ((self.entries.len() as f64) * fraction).ceil() as usize;
        if target == 0 {
            return 0;
        }
        let mut by_heat: Vec<(String, f64)> = self
            .access
            .iter()
            .map(|(id, record)| (id.clone(), record.heat_score))
            .collect();
        by_heat.sort_by(|a, b| a.1.total_cmp(&b.1));
        let victims: Vec<String> = by_heat.into_iter().take(target).map(|(id, _)| id).collect();
        for id in &victims {
            self.remove(id);
        }
        victims.len()
    }

    fn codec_ready(&self, tier: Tier) -> bool {
        match tier {
            Tier::Hot | Tier::Warm => true,
            Tier::Cool => self.pq8.is_some(),
            Tier::Cold => self.pq4.is_some(),
            Tier::Frozen => self.binary.is_some(),
        }
    }

    fn encode_for(&self, tier: Tier, vector: &[f32]) -> Result<(Vec<u8>, Option<u32>)> {
        match tier {
            Tier::Hot => Ok((codec::encode_f32(vector), None)),
            Tier::Warm => Ok((codec::encode_f16(vector), None)),
            Tier::Cool => {
                let codebook = self.pq8.as_ref().ok_or(Error::CodecNotTrained(tier))?;
                Ok((codebook.encode_pq8(vector)?, Some(codebook.generation)))
            }
            Tier::Cold => {
                let codebook = self.pq4.as_ref().ok_or(Error::CodecNotTrained(tier))?;
                Ok((codebook.encode_pq4(vector)?, Some(codebook.generation)))
            }
            Tier::Frozen => {
                let binary = self.binary.as_ref().ok_or(Error::CodecNotTrained(tier))?;
                Ok((binary.encode(vector)?, Some(self.codebook_generation)))
            }
        }
    }

    fn decode(&self, entry: &CompressedEmbedding) -> Result<Vec<f32>> {
        self.decode_raw(
            entry.tier,
            &entry.data,
            entry.original_dim,
            entry.codebook_index,
        )
    }

    fn decode_raw(
        &self,
        tier: Tier,
        data: &[u8],
        dim: usize,
        _codebook_index: Option<u32>,
    ) -> Result<Vec<f32>> {
        match tier {
            Tier::Hot => codec::decode_f32(data, dim),
            Tier::Warm => codec::decode_f16(data, dim),
            Tier::Cool => {
                let codebook = self.pq8.as_ref().ok_or(Error::CodecNotTrained(tier))?;
                codebook.decode_pq8(data)
            }
            Tier::Cold => {
                let codebook = self.pq4.as_ref().ok_or(Error::CodecNotTrained(tier))?;
                codebook.decode_pq4(data)
            }
            Tier::Frozen => {
                let binary = self.binary.as_ref().ok_or(Error::CodecNotTrained(tier))?;
                binary.decode(data, dim)
            }
        }
    }
}

/// Spawn the periodic decay + transition check task.
///
/// Also trains codebooks once the buffer first crosses its minimum, so
/// demotions below Warm become possible without an explicit call.
pub fn spawn_auto_transitions(
    manager: Arc<RwLock<CompressionManager>>,
) -> tokio::task::JoinHandle<()> {
    let period = manager.read().config.auto_transition_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let transitions = {
                let mut guard = manager.write();
                if !guard.codebooks_trained() && guard.ready_to_train() {
                    if let Err(err) = guard.train_codebooks() {
                        warn!(%err, "scheduled codebook training failed");
                    }
                }
                guard.decay_heat();
                guard.check_transitions()
            };
            if !transitions.is_empty() {
                info!(count = transitions.len(), "auto-transitioned vectors");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rand::rngs::StdRng;
    use rand::{RngExt, SeedableRng};

    use crate::vector::normalize;

    const DIM: usize = 32;

    fn config() -> CompressionConfig {
        let mut config = CompressionConfig::new(DIM);
        config.pq = PqConfig {
            num_subvectors: 8,
            seed: Some(3),
            ..PqConfig::default()
        };
        config
    }

    fn unit_vector(rng: &mut StdRng) -> Vec<f32> {
        let mut v: Vec<f32> = (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect();
        normalize(&mut v);
        v
    }

    fn seeded_manager(count: usize) -> CompressionManager {
        let mut manager = CompressionManager::new(config());
        let mut rng = StdRng::seed_from_u64(99);
        for i in 0..count {
            manager.store(&format!("v{i}"), unit_vector(&mut rng)).unwrap();
        }
        manager
    }

    #[test]
    fn store_and_retrieve_round_trips() {
        let mut manager = seeded_manager(1);
        let got = manager.retrieve("v0").unwrap().unwrap();
        assert_eq!(got.len(), DIM);
        assert_eq!(manager.tier_of("v0"), Some(Tier::Hot));
        assert!(manager.retrieve("missing").unwrap().is_none());
    }

    #[test]
    fn backward_transition_is_rejected() {
        let mut manager = seeded_manager(1);
        manager.transition_tier("v0", Tier::Warm).unwrap();
        let err = manager.transition_tier("v0", Tier::Hot).unwrap_err();
        assert!(matches!(err, Error::InvalidTier { .. }));
    }

    #[test]
    fn pq_tiers_need_training() {
        let mut manager = seeded_manager(1);
        let err = manager.transition_tier("v0", Tier::Cool).unwrap_err();
        assert!(matches!(err, Error::CodecNotTrained(Tier::Cool)));
    }

    #[test]
    fn full_lifecycle_hot_to_frozen() {
        let mut manager = seeded_manager(150);
        assert!(manager.ready_to_train());
        manager.train_codebooks().unwrap();

        for tier in [Tier::Warm, Tier::Cool, Tier::Cold, Tier::Frozen] {
            manager.transition_tier("v0", tier).unwrap();
            assert_eq!(manager.tier_of("v0"), Some(tier));
            let decoded = manager.retrieve("v0").unwrap().unwrap();
            assert_eq!(decoded.len(), DIM);
        }
    }

    #[test]
    fn check_transitions_skips_untrained_codecs() {
        let mut manager = seeded_manager(2);
        let now = Utc::now() + ChronoDuration::hours(72);
        manager.decay_heat_at(now);
        // Heat is frozen-band but no codec is trained: nothing moves.
        let applied = manager.check_transitions();
        assert!(applied.is_empty());
        assert_eq!(manager.tier_of("v0"), Some(Tier::Hot));
    }

    #[test]
    fn check_transitions_demotes_cold_vectors() {
        let mut manager = seeded_manager(150);
        manager.train_codebooks().unwrap();
        let now = Utc::now() + ChronoDuration::hours(72);
        manager.decay_heat_at(now);
        let applied = manager.check_transitions();
        assert_eq!(applied.len(), 150);
        assert!(applied.iter().all(|t| t.to == Tier::Frozen));
    }

    #[test]
    fn tier_sequence_is_monotonic() {
        let mut manager = seeded_manager(150);
        manager.train_codebooks().unwrap();

        let mut observed = vec![manager.tier_of("v1").unwrap()];
        for hours in [1, 12, 36, 90] {
            manager.decay_heat_at(Utc::now() + ChronoDuration::hours(hours));
            manager.check_transitions();
            observed.push(manager.tier_of("v1").unwrap());
        }
        for pair in observed.windows(2) {
            assert!(pair[0] <= pair[1], "tier moved backward: {observed:?}");
        }
    }

    #[test]
    fn eviction_takes_coldest_first() {
        let mut manager = seeded_manager(10);
        // Touch half the vectors so the untouched half is colder.
        let now = Utc::now() + ChronoDuration::hours(24);
        for i in 0..5 {
            manager.retrieve_at(&format!("v{i}"), now).unwrap();
        }
        manager.decay_heat_at(now);
        let evicted = manager.evict_fraction(0.5);
        assert_eq!(evicted, 5);
        for i in 0..5 {
            assert!(manager.contains(&format!("v{i}")), "hot vector v{i} evicted");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auto_transition_task_trains_codebooks() {
        let manager = Arc::new(RwLock::new(seeded_manager(150)));
        assert!(!manager.read().codebooks_trained());
        let handle = spawn_auto_transitions(Arc::clone(&manager));
        // The first interval tick fires immediately; let the task run.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.read().codebooks_trained());
        handle.abort();
    }

    #[test]
    fn payload_sizes_match_config() {
        let config = CompressionConfig::new(1536);
        assert_eq!(config.bytes_per_vector(Tier::Hot), 6144);
        assert_eq!(config.bytes_per_vector(Tier::Warm), 3072);
        assert_eq!(config.bytes_per_vector(Tier::Frozen), 192);
        assert_eq!(config.bytes_per_vector(Tier::Cool), 96);
        assert_eq!(config.bytes_per_vector(Tier::Cold), 48);
    }
}
