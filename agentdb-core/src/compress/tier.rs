//! Compression tiers and their fixed configuration bands.

use serde::{Deserialize, Serialize};

/// Compression tier for a stored vector.
///
/// Tiers are ordered; a vector only ever moves toward `Frozen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cool,
    Cold,
    Frozen,
}

impl Tier {
    /// All tiers in demotion order.
    pub const ALL: [Tier; 5] = [Tier::Hot, Tier::Warm, Tier::Cool, Tier::Cold, Tier::Frozen];

    /// Whether moving to `target` is a legal (strictly forward) transition.
    #[must_use]
    pub fn can_transition_to(self, target: Tier) -> bool {
        target > self
    }

    /// Tier a heat score maps into, per the fixed heat bands.
    #[must_use]
    pub fn for_heat(heat: f64) -> Tier {
        if heat >= 0.8 {
            Tier::Hot
        } else if heat >= 0.4 {
            Tier::Warm
        } else if heat >= 0.1 {
            Tier::Cool
        } else if heat >= 0.01 {
            Tier::Cold
        } else {
            Tier::Frozen
        }
    }

    /// Acceptable mean-squared reconstruction error for this tier.
    #[must_use]
    pub fn max_reconstruction_error(self) -> f32 {
        match self {
            Tier::Hot | Tier::Warm => 0.0001,
            Tier::Cool => 0.02,
            Tier::Cold => 0.05,
            Tier::Frozen => 0.10,
        }
    }

    /// Nominal compression ratio relative to float32.
    #[must_use]
    pub fn compression_ratio(self) -> u32 {
        match self {
            Tier::Hot => 1,
            Tier::Warm => 2,
            Tier::Cool => 8,
            Tier::Cold => 16,
            Tier::Frozen => 32,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cool => "cool",
            Tier::Cold => "cold",
            Tier::Frozen => "frozen",
        };
        write!(f, "{name}")
    }
}

/// A vector in its stored, tier-dependent form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedEmbedding {
    /// Store-unique key
    pub vector_id: String,
    /// Current tier; only ever advances toward `Frozen`
    pub tier: Tier,
    /// Encoded payload, interpreted per tier
    pub data: Vec<u8>,
    /// Dimension before encoding, checked on decompress
    pub original_dim: usize,
    /// Milliseconds since epoch at (re)compression time
    pub compressed_at: i64,
    /// Which PQ codebook generation produced this entry, if any
    pub codebook_index: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_order_hot_to_frozen() {
        assert!(Tier::Hot < Tier::Warm);
        assert!(Tier::Warm < Tier::Cool);
        assert!(Tier::Cool < Tier::Cold);
        assert!(Tier::Cold < Tier::Frozen);
    }

    #[test]
    fn only_forward_transitions_allowed() {
        assert!(Tier::Hot.can_transition_to(Tier::Warm));
        assert!(Tier::Hot.can_transition_to(Tier::Frozen));
        assert!(!Tier::Warm.can_transition_to(Tier::Hot));
        assert!(!Tier::Cool.can_transition_to(Tier::Cool));
    }

    #[test]
    fn heat_bands_map_to_tiers() {
        assert_eq!(Tier::for_heat(1.0), Tier::Hot);
        assert_eq!(Tier::for_heat(0.8), Tier::Hot);
        assert_eq!(Tier::for_heat(0.5), Tier::Warm);
        assert_eq!(Tier::for_heat(0.2), Tier::Cool);
        assert_eq!(Tier::for_heat(0.05), Tier::Cold);
        assert_eq!(Tier::for_heat(0.0), Tier::Frozen);
    }
}
