//! Agent capability records and the closed domain tag set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of domain tags an agent can claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Coding,
    Research,
    Writing,
    Analysis,
    Planning,
    Review,
    Data,
    Infra,
    General,
}

impl Domain {
    /// Parse a domain tag; unknown tags map to `None`.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "coding" | "code" => Some(Self::Coding),
            "research" => Some(Self::Research),
            "writing" => Some(Self::Writing),
            "analysis" => Some(Self::Analysis),
            "planning" => Some(Self::Planning),
            "review" | "qa" => Some(Self::Review),
            "data" => Some(Self::Data),
            "infra" | "infrastructure" => Some(Self::Infra),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Research => "research",
            Self::Writing => "writing",
            Self::Analysis => "analysis",
            Self::Planning => "planning",
            Self::Review => "review",
            Self::Data => "data",
            Self::Infra => "infra",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent's embedded capability record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityEntry {
    pub agent_key: String,
    pub name: String,
    pub description: String,
    pub domains: Vec<Domain>,
    pub keywords: Vec<String>,
    /// D-dim, L2-normalized
    pub embedding: Vec<f32>,
    pub success_rate: f64,
    pub task_count: u64,
    pub indexed_at: DateTime<Utc>,
}

impl CapabilityEntry {
    /// Text fed to the embedding provider for this agent.
    #[must_use]
    pub fn embedding_text(name: &str, description: &str, keywords: &[String]) -> String {
        let mut text = format!("{name}\n{description}");
        if !keywords.is_empty() {
            text.push('\n');
            text.push_str(&keywords.join(", "));
        }
        text
    }

    /// Whether this agent claims any of the given domains.
    #[must_use]
    pub fn overlaps(&self, domains: &[Domain]) -> bool {
        domains.iter().any(|d| self.domains.contains(d))
    }
}
