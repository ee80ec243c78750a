//! Per-vector access tracking and heat scoring.
//!
//! Heat combines recency and frequency: `0.6 * recency + 0.4 * frequency`
//! where `recency = exp(-decay_rate * hours_since_last_access)` and
//! `frequency = min(1, accesses_in_window / 10)`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Access window for frequency counting.
pub const ACCESS_WINDOW_HOURS: i64 = 24;

/// Accesses within the window that saturate the frequency term.
pub const FREQUENCY_SATURATION: usize = 10;

/// Default heat decay rate per hour of inactivity.
pub const DEFAULT_DECAY_RATE: f64 = 0.1;

/// Usage metadata for one stored vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    /// Recent access times, pruned to the access window on every touch
    pub access_timestamps: VecDeque<DateTime<Utc>>,
    /// Monotonic total access counter
    pub total_accesses: u64,
    /// Derived heat score in [0, 1]
    pub heat_score: f64,
    pub last_access_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AccessRecord {
    /// New record for a vector stored at `now`; starts at full heat.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        let mut timestamps = VecDeque::new();
        timestamps.push_back(now);
        Self {
            access_timestamps: timestamps,
            total_accesses: 1,
            heat_score: 1.0,
            last_access_at: now,
            created_at: now,
        }
    }

    /// Record an access and recompute heat.
    pub fn touch(&mut self, now: DateTime<Utc>, decay_rate: f64) {
        self.access_timestamps.push_back(now);
        self.total_accesses += 1;
        self.last_access_at = now;
        self.prune(now);
        self.heat_score = self.compute_heat(now, decay_rate);
    }

    /// Recompute heat without recording an access (decay pass).
    pub fn decay(&mut self, now: DateTime<Utc>, decay_rate: f64) {
        self.prune(now);
        self.heat_score = self.compute_heat(now, decay_rate);
    }

    /// Drop timestamps older than the access window.
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(ACCESS_WINDOW_HOURS);
        while let Some(front) = self.access_timestamps.front() {
            if *front < cutoff {
                self.access_timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn compute_heat(&self, now: DateTime<Utc>, decay_rate: f64) -> f64 {
        let idle_hours =
            (now - self.last_access_at).num_milliseconds().max(0) as f64 / 3_600_000.0;
        let recency = (-decay_rate * idle_hours).exp();
        let frequency =
            (self.access_timestamps.len() as f64 / FREQUENCY_SATURATION as f64).min(1.0);
        (0.6 * recency + 0.4 * frequency).clamp(0.0, 1.0)
    }
}
