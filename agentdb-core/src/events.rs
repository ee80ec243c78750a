//! In-memory activity bus: the event contract for observers.
//!
//! Emission is fire-and-forget: events land in a bounded ring buffer
//! and are fanned out to subscribers whose channels have room. Slow
//! subscribers lose events; emitters never block or fail.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Default ring buffer capacity.
pub const DEFAULT_BUFFER: usize = 1024;

/// Per-subscriber channel depth.
const SUBSCRIBER_DEPTH: usize = 256;

/// Event kinds in the activity contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EpisodeStored,
    EpisodeRetrieved,
    OutcomeRecorded,
    RouteSelected,
    PipelineGenerated,
    TierTransition,
    Eviction,
    HookExecuted,
    DaemonStarted,
    DaemonStopping,
}

/// One activity event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub kind: EventKind,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Bounded event buffer with best-effort subscriber fan-out.
pub struct ActivityBus {
    buffer: Mutex<VecDeque<ActivityEvent>>,
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<ActivityEvent>>>,
}

impl Default for ActivityBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl ActivityBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER))),
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Emit an event. Never blocks, never fails.
    pub fn emit(&self, kind: EventKind, detail: serde_json::Value) {
        let event = ActivityEvent {
            kind,
            detail,
            at: Utc::now(),
        };

        {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }

        // Dead or full subscribers are dropped on the spot.
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> mpsc::Receiver<ActivityEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_DEPTH);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Most recent `n` events, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<ActivityEvent> {
        let buffer = self.buffer.lock();
        buffer
            .iter()
            .skip(buffer.len().saturating_sub(n))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }
}
