//! Per-request token usage tracking with bounded buffering.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

/// Default buffered records before auto-flush folds into aggregates.
pub const DEFAULT_FLUSH_LIMIT: usize = 1000;

/// One request's token usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub session_id: String,
    pub request_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub task_type: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregated totals for one grouping key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenStats {
    fn absorb(&mut self, usage: &TokenUsage) {
        self.requests += 1;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
    }
}

/// Bounded in-memory token tracker.
///
/// Recent records stay in the buffer for time-window queries; once the
/// buffer hits the flush limit the oldest records fold into cumulative
/// per-key aggregates and drop out of the window.
pub struct TokenTracker {
    buffer: VecDeque<TokenUsage>,
    flush_limit: usize,
    by_session: HashMap<String, TokenStats>,
    by_task_type: HashMap<String, TokenStats>,
    by_agent: HashMap<String, TokenStats>,
    by_trajectory: HashMap<Uuid, TokenStats>,
}

impl TokenTracker {
    #[must_use]
    pub fn new(flush_limit: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            flush_limit: flush_limit.max(1),
            by_session: HashMap::new(),
            by_task_type: HashMap::new(),
            by_agent: HashMap::new(),
            by_trajectory: HashMap::new(),
        }
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Record one request's usage.
    pub fn record(&mut self, usage: TokenUsage) {
        self.absorb(&usage);
        self.buffer.push_back(usage);
        if self.buffer.len() >= self.flush_limit {
            self.flush();
        }
    }

    /// Drop buffered records, keeping the aggregates.
    pub fn flush(&mut self) {
        debug!(flushed = self.buffer.len(), "token buffer flushed");
        self.buffer.clear();
    }

    /// Evict a fraction of the buffered records, oldest first.
    pub fn evict_fraction(&mut self, fraction: f64) -> u64 {
        let count = ((self.buffer.len() as f64) * fraction).ceil() as usize;
        for _ in 0..count {
            self.buffer.pop_front();
        }
        count as u64
    }

    fn absorb(&mut self, usage: &TokenUsage) {
        self.by_session
            .entry(usage.session_id.clone())
            .or_default()
            .absorb(usage);
        self.by_task_type
            .entry(usage.task_type.clone())
            .or_default()
            .absorb(usage);
        self.by_agent
            .entry(usage.agent_id.clone())
            .or_default()
            .absorb(usage);
        if let Some(trajectory_id) = usage.trajectory_id {
            self.by_trajectory
                .entry(trajectory_id)
                .or_default()
                .absorb(usage);
        }
    }

    #[must_use]
    pub fn by_session(&self, session_id: &str) -> TokenStats {
        self.by_session.get(session_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn by_task_type(&self, task_type: &str) -> TokenStats {
        self.by_task_type.get(task_type).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn by_agent(&self, agent_id: &str) -> TokenStats {
        self.by_agent.get(agent_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn by_trajectory(&self, trajectory_id: &Uuid) -> TokenStats {
        self.by_trajectory
            .get(trajectory_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Totals over buffered records within the trailing window.
    #[must_use]
    pub fn window(&self, window: Duration) -> TokenStats {
        let cutoff = Utc::now() - window;
        let mut stats = TokenStats::default();
        for usage in self.buffer.iter().filter(|u| u.recorded_at >= cutoff) {
            stats.absorb(usage);
        }
        stats
    }
}
