//! Memory budget monitoring and eviction orchestration.
//!
//! Components register as cache adapters reporting usage against a fixed
//! budget. The periodic check emits warning alerts at 75% and error
//! alerts at 100%; warnings evict 20% of the component, errors 40%, and
//! a total-overhead alert fans out to every cache.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Warning threshold as a fraction of the budget.
pub const WARNING_RATIO: f64 = 0.75;

/// Error threshold as a fraction of the budget.
pub const ERROR_RATIO: f64 = 1.0;

/// Eviction fraction on a warning alert.
pub const WARNING_EVICTION: f64 = 0.2;

/// Eviction fraction on an error alert.
pub const ERROR_EVICTION: f64 = 0.4;

/// Budgeted components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetComponent {
    EpisodeCache,
    EmbeddingCache,
    TrajectoryCache,
    TotalOverhead,
}

/// Budget limits per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBudgets {
    /// Episode cache entries
    pub episode_cache_entries: u64,
    /// Embedding cache bytes
    pub embedding_cache_bytes: u64,
    /// Trajectory cache entries
    pub trajectory_cache_entries: u64,
    /// Total process-heap overhead bytes
    pub total_overhead_bytes: u64,
}

impl Default for MemoryBudgets {
    fn default() -> Self {
        Self {
            episode_cache_entries: 1000,
            embedding_cache_bytes: 100 * 1024 * 1024,
            trajectory_cache_entries: 100,
            total_overhead_bytes: 200 * 1024 * 1024,
        }
    }
}

impl MemoryBudgets {
    #[must_use]
    pub fn limit_for(&self, component: BudgetComponent) -> u64 {
        match component {
            BudgetComponent::EpisodeCache => self.episode_cache_entries,
            BudgetComponent::EmbeddingCache => self.embedding_cache_bytes,
            BudgetComponent::TrajectoryCache => self.trajectory_cache_entries,
            BudgetComponent::TotalOverhead => self.total_overhead_bytes,
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Error,
}

/// One budget alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAlert {
    pub component: BudgetComponent,
    pub level: AlertLevel,
    pub current: u64,
    pub limit: u64,
    pub ratio: f64,
}

/// Result of one eviction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionOutcome {
    pub component: BudgetComponent,
    pub requested: u64,
    pub evicted: u64,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A cache that reports usage and evicts on demand.
///
/// Each implementation applies its own policy: the episode cache evicts
/// LRU, the embedding cache by fraction, the trajectory cache flushes
/// completed trajectories before evicting oldest.
pub trait CacheAdapter: Send + Sync {
    fn component(&self) -> BudgetComponent;
    /// Current usage in the component's budget unit.
    fn usage(&self) -> u64;
    /// Evict roughly `fraction` of current usage; returns evicted count.
    fn evict(&self, fraction: f64) -> Result<u64, String>;
}

/// Periodic budget checker and eviction driver.
pub struct BudgetMonitor {
    budgets: MemoryBudgets,
    adapters: RwLock<Vec<Arc<dyn CacheAdapter>>>,
}

impl BudgetMonitor {
    #[must_use]
    pub fn new(budgets: MemoryBudgets) -> Self {
        Self {
            budgets,
            adapters: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, adapter: Arc<dyn CacheAdapter>) {
        self.adapters.write().push(adapter);
    }

    #[must_use]
    pub fn budgets(&self) -> &MemoryBudgets {
        &self.budgets
    }

    /// Collect usage and emit alerts for components at or over warning.
    #[must_use]
    pub fn check(&self) -> Vec<BudgetAlert> {
        let mut alerts = Vec::new();
        let mut total_usage = 0u64;
        for adapter in self.adapters.read().iter() {
            let component = adapter.component();
            let current = adapter.usage();
            if component == BudgetComponent::EmbeddingCache {
                total_usage += current;
            }
            let limit = self.budgets.limit_for(component);
            if let Some(alert) = alert_for(component, current, limit) {
                alerts.push(alert);
            }
        }
        // Total overhead is tracked from the byte-denominated caches.
        if let Some(alert) = alert_for(
            BudgetComponent::TotalOverhead,
            total_usage,
            self.budgets.total_overhead_bytes,
        ) {
            alerts.push(alert);
        }
        alerts
    }

    /// React to alerts with per-component evictions.
    ///
    /// Failures are reported per component and never propagate.
    pub fn respond(&self, alerts: &[BudgetAlert]) -> Vec<EvictionOutcome> {
        let mut outcomes = Vec::new();
        for alert in alerts {
            let fraction = match alert.level {
                AlertLevel::Warning => WARNING_EVICTION,
                AlertLevel::Error => ERROR_EVICTION,
            };
            match alert.component {
                BudgetComponent::TotalOverhead => {
                    // Fan out to every registered cache.
                    for adapter in self.adapters.read().iter() {
                        outcomes.push(run_eviction(adapter.as_ref(), fraction));
                    }
                }
                component => {
                    let adapters = self.adapters.read();
                    if let Some(adapter) =
                        adapters.iter().find(|a| a.component() == component)
                    {
                        outcomes.push(run_eviction(adapter.as_ref(), fraction));
                    }
                }
            }
        }
        outcomes
    }

    /// One check-and-respond cycle.
    pub fn tick(&self) -> (Vec<BudgetAlert>, Vec<EvictionOutcome>) {
        let alerts = self.check();
        if alerts.is_empty() {
            return (alerts, Vec::new());
        }
        for alert in &alerts {
            warn!(
                component = ?alert.component,
                level = ?alert.level,
                current = alert.current,
                limit = alert.limit,
                ratio = alert.ratio,
                "memory budget alert"
            );
        }
        let outcomes = self.respond(&alerts);
        (alerts, outcomes)
    }
}

fn alert_for(component: BudgetComponent, current: u64, limit: u64) -> Option<BudgetAlert> {
    if limit == 0 {
        return None;
    }
    let ratio = current as f64 / limit as f64;
    let level = if ratio >= ERROR_RATIO {
        AlertLevel::Error
    } else if ratio >= WARNING_RATIO {
        AlertLevel::Warning
    } else {
        return None;
    };
    Some(BudgetAlert {
        component,
        level,
        current,
        limit,
        ratio,
    })
}

fn run_eviction(adapter: &dyn CacheAdapter, fraction: f64) -> EvictionOutcome {
    let requested = (adapter.usage() as f64 * fraction).ceil() as u64;
    let started = Instant::now();
    match adapter.evict(fraction) {
        Ok(evicted) => {
            info!(component = ?adapter.component(), evicted, "eviction completed");
            EvictionOutcome {
                component: adapter.component(),
                requested,
                evicted,
                duration_ms: started.elapsed().as_millis() as u64,
                success: true,
                error: None,
            }
        }
        Err(error) => EvictionOutcome {
            component: adapter.component(),
            requested,
            evicted: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            success: false,
            error: Some(error),
        },
    }
}

/// Spawn the periodic budget check task.
pub fn spawn_budget_checks(
    monitor: Arc<BudgetMonitor>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (alerts, _) = monitor.tick();
            if !alerts.is_empty() {
                info!(alerts = alerts.len(), "budget check reacted");
            }
        }
    })
}
