//! Retrieval filtering: similarity thresholds, injection confidence,
//! phase windows, and negative-example warnings.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Episode, Phase, MIN_OUTCOMES};

/// Default similarity floor for retrieval.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// Stricter floor for the coding domain.
pub const CODING_SIMILARITY_THRESHOLD: f32 = 0.92;

/// Success rate below which a warning attaches to a result.
pub const WARNING_SUCCESS_RATE: f64 = 0.5;

/// Days within which an episode counts as recent for confidence scoring.
const RECENT_DAYS: i64 = 30;

/// Injection confidence assigned to each candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// Assign a level from similarity and recency.
    ///
    /// High requires similarity ≥ 0.85 *and* recency; an old episode at
    /// high similarity degrades to medium.
    #[must_use]
    pub fn assign(similarity: f32, recent: bool) -> Self {
        if similarity >= 0.85 && recent {
            Self::High
        } else if similarity >= 0.75 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Options for a retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievalOptions {
    /// Results requested (capped by the phase window)
    pub k: usize,
    /// Index candidates fetched before filtering; `None` means `k * 2`
    pub rerank_candidates: Option<usize>,
    /// Restrict to one domain; also selects the similarity threshold
    pub domain: Option<String>,
    /// Caller phase, capping the injection window
    pub phase: Phase,
    /// Drop candidates below this confidence
    pub min_confidence: Option<ConfidenceLevel>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k: 5,
            rerank_candidates: None,
            domain: None,
            phase: Phase::Default,
            min_confidence: None,
        }
    }
}

impl RetrievalOptions {
    /// Candidates to pull from the index before filtering.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.rerank_candidates.unwrap_or(self.k * 2)
    }

    /// Similarity floor for this call's domain.
    #[must_use]
    pub fn similarity_threshold(&self) -> f32 {
        match self.domain.as_deref() {
            Some("coding") => CODING_SIMILARITY_THRESHOLD,
            _ => DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    /// Effective result cap after the phase window applies.
    #[must_use]
    pub fn effective_k(&self) -> usize {
        self.k.min(self.phase.window_size())
    }
}

/// One retrieval result, enhanced with outcome history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedEpisode {
    pub episode: Episode,
    pub similarity: f32,
    pub confidence: ConfidenceLevel,
    pub outcome_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    /// Attached instead of suppressing a low-success result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl RetrievedEpisode {
    /// Build a result from an episode and its query similarity.
    #[must_use]
    pub fn enhance(episode: Episode, similarity: f32) -> Self {
        let recent = Utc::now() - episode.created_at <= Duration::days(RECENT_DAYS);
        let confidence = ConfidenceLevel::assign(similarity, recent);
        let outcome_count = episode.outcome_count();
        let success_rate = episode.success_rate();
        let warning = match success_rate {
            Some(rate) if rate < WARNING_SUCCESS_RATE && outcome_count >= MIN_OUTCOMES => {
                Some(format!(
                    "episode succeeded in only {:.0}% of {} outcomes",
                    rate * 100.0,
                    outcome_count
                ))
            }
            _ => None,
        };
        Self {
            episode,
            similarity,
            confidence,
            outcome_count,
            success_rate,
            warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn episode(successes: u32, failures: u32, age_days: i64) -> Episode {
        Episode {
            episode_id: Uuid::new_v4(),
            task_text: "t".into(),
            answer_text: "a".into(),
            agent_type: "agent".into(),
            reasoning_trace: None,
            domain: "general".into(),
            tags: Vec::new(),
            created_at: Utc::now() - Duration::days(age_days),
            vector_id: "v".into(),
            successes,
            failures,
        }
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(ConfidenceLevel::assign(0.90, true), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::assign(0.90, false), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::assign(0.80, true), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::assign(0.72, true), ConfidenceLevel::Low);
    }

    #[test]
    fn coding_domain_raises_the_threshold() {
        let default = RetrievalOptions::default();
        assert_eq!(default.similarity_threshold(), 0.7);
        let coding = RetrievalOptions {
            domain: Some("coding".into()),
            ..RetrievalOptions::default()
        };
        assert_eq!(coding.similarity_threshold(), 0.92);
    }

    #[test]
    fn rerank_candidates_default_to_twice_k() {
        let options = RetrievalOptions {
            k: 4,
            ..RetrievalOptions::default()
        };
        assert_eq!(options.candidate_count(), 8);
        let explicit = RetrievalOptions {
            k: 4,
            rerank_candidates: Some(20),
            ..RetrievalOptions::default()
        };
        assert_eq!(explicit.candidate_count(), 20);
    }

    #[test]
    fn phase_caps_the_window() {
        let options = RetrievalOptions {
            k: 8,
            phase: Phase::Planning,
            ..RetrievalOptions::default()
        };
        assert_eq!(options.effective_k(), 2);
    }

    #[test]
    fn low_success_attaches_a_warning() {
        let result = RetrievedEpisode::enhance(episode(1, 3, 0), 0.9);
        assert!(result.warning.is_some());
        assert_eq!(result.outcome_count, 4);

        // Too few outcomes: no warning even at zero successes.
        let sparse = RetrievedEpisode::enhance(episode(0, 2, 0), 0.9);
        assert!(sparse.warning.is_none());

        // Healthy history: no warning.
        let healthy = RetrievedEpisode::enhance(episode(5, 1, 0), 0.9);
        assert!(healthy.warning.is_none());
    }
}
