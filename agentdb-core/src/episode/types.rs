//! Episode records and retrieval phases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcomes required before a success rate is considered meaningful.
pub const MIN_OUTCOMES: u32 = 3;

/// A recorded prior task with its response, vectorized and retrievable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub episode_id: Uuid,
    pub task_text: String,
    pub answer_text: String,
    pub agent_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_trace: Option<String>,
    pub domain: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Key of the task vector in the index and compression store
    pub vector_id: String,
    pub successes: u32,
    pub failures: u32,
}

impl Episode {
    /// Total recorded outcomes.
    #[must_use]
    pub fn outcome_count(&self) -> u32 {
        self.successes + self.failures
    }

    /// Success rate, defined only once enough outcomes accumulated.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.outcome_count();
        if total >= MIN_OUTCOMES {
            Some(f64::from(self.successes) / f64::from(total))
        } else {
            None
        }
    }
}

/// Caller-declared phase, mapped to a retrieval window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Research,
    Writing,
    Qa,
    #[default]
    Default,
}

impl Phase {
    /// Max results injected per call in this phase.
    #[must_use]
    pub fn window_size(self) -> usize {
        match self {
            Self::Planning => 2,
            Self::Research | Self::Default => 3,
            Self::Writing => 5,
            Self::Qa => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(successes: u32, failures: u32) -> Episode {
        Episode {
            episode_id: Uuid::new_v4(),
            task_text: "t".into(),
            answer_text: "a".into(),
            agent_type: "agent".into(),
            reasoning_trace: None,
            domain: "general".into(),
            tags: Vec::new(),
            created_at: Utc::now(),
            vector_id: "v".into(),
            successes,
            failures,
        }
    }

    #[test]
    fn success_rate_needs_min_outcomes() {
        assert_eq!(episode(2, 0).success_rate(), None);
        assert_eq!(episode(2, 1).success_rate(), Some(2.0 / 3.0));
        assert_eq!(episode(0, 4).success_rate(), Some(0.0));
    }

    #[test]
    fn phase_windows_match_policy() {
        assert_eq!(Phase::Planning.window_size(), 2);
        assert_eq!(Phase::Research.window_size(), 3);
        assert_eq!(Phase::Writing.window_size(), 5);
        assert_eq!(Phase::Qa.window_size(), 10);
        assert_eq!(Phase::Default.window_size(), 3);
    }
}
