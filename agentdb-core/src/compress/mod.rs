//! Adaptive compression lifecycle for stored vectors.
//!
//! Vectors enter at the hot (float32) tier and demote one-way through
//! warm (float16), cool (PQ8), cold (PQ4), and frozen (binary) as their
//! heat score decays.

pub mod binary;
pub mod codec;
pub mod heat;
pub mod manager;
pub mod pq;
pub mod tier;

pub use binary::BinaryCodec;
pub use heat::{AccessRecord, ACCESS_WINDOW_HOURS, DEFAULT_DECAY_RATE};
pub use manager::{
    spawn_auto_transitions, CompressionConfig, CompressionManager, CompressionStats,
    TierTransition,
};
pub use pq::{Codebook, PqConfig};
pub use tier::{CompressedEmbedding, Tier};
