//! Memory budgets, eviction, and token accounting.

pub mod budget;
pub mod tokens;

pub use budget::{
    spawn_budget_checks, AlertLevel, BudgetAlert, BudgetComponent, BudgetMonitor, CacheAdapter,
    EvictionOutcome, MemoryBudgets, ERROR_EVICTION, WARNING_EVICTION,
};
pub use tokens::{TokenStats, TokenTracker, TokenUsage, DEFAULT_FLUSH_LIMIT};
