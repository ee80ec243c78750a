//! Pre/post tool-use hooks with priority ordering and error isolation.
//!
//! Registration closes at `initialize()`; the two required post hooks
//! (`task-result-capture` and `quality-assessment-trigger`) must exist
//! by then or initialization fails. Hooks run sequentially in ascending
//! priority; a failing hook is recorded and the chain continues unless a
//! hook explicitly halts it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Quality score at which feedback recording triggers.
pub const FEEDBACK_THRESHOLD: f64 = 0.5;

/// Quality score at which an output becomes a pattern candidate.
pub const PATTERN_THRESHOLD: f64 = 0.7;

/// Post hooks that must be registered before `initialize()`.
pub const REQUIRED_POST_HOOKS: [&str; 2] = ["task-result-capture", "quality-assessment-trigger"];

/// Context passed to pre-tool hooks.
#[derive(Debug, Clone)]
pub struct PreToolContext {
    pub tool_name: String,
    pub input: Value,
    pub trajectory_id: Option<Uuid>,
}

/// Context passed to post-tool hooks.
#[derive(Debug, Clone)]
pub struct PostToolContext {
    pub tool_name: String,
    pub output: String,
    pub trajectory_id: Option<Uuid>,
    /// True when the tool invocation itself failed
    pub execution_failed: bool,
    pub metadata: Value,
}

/// What a hook decided.
#[derive(Debug, Clone)]
pub struct HookDecision {
    /// False halts the chain
    pub continue_chain: bool,
    pub stop_reason: Option<String>,
    /// Pre hooks only: replacement input threaded to later hooks
    pub modified_input: Option<Value>,
    /// Merged into the chain result under the hook's id
    pub metadata: Value,
}

impl HookDecision {
    /// Continue the chain unchanged.
    #[must_use]
    pub fn proceed() -> Self {
        Self {
            continue_chain: true,
            stop_reason: None,
            modified_input: None,
            metadata: Value::Null,
        }
    }

    /// Continue with metadata attached.
    #[must_use]
    pub fn with_metadata(metadata: Value) -> Self {
        Self {
            metadata,
            ..Self::proceed()
        }
    }

    /// Continue with a rewritten tool input.
    #[must_use]
    pub fn modify_input(input: Value) -> Self {
        Self {
            modified_input: Some(input),
            ..Self::proceed()
        }
    }

    /// Halt the chain.
    #[must_use]
    pub fn halt(reason: impl Into<String>) -> Self {
        Self {
            continue_chain: false,
            stop_reason: Some(reason.into()),
            modified_input: None,
            metadata: Value::Null,
        }
    }
}

/// A hook that runs before a tool invocation.
#[async_trait]
pub trait PreToolHook: Send + Sync {
    fn id(&self) -> &str;
    /// Lower runs first.
    fn priority(&self) -> i32;
    /// Restrict to one tool; `None` matches all.
    fn tool_filter(&self) -> Option<&str> {
        None
    }
    async fn handle(&self, ctx: &PreToolContext) -> Result<HookDecision>;
}

/// A hook that runs after a tool invocation.
#[async_trait]
pub trait PostToolHook: Send + Sync {
    fn id(&self) -> &str;
    fn priority(&self) -> i32;
    fn tool_filter(&self) -> Option<&str> {
        None
    }
    async fn handle(&self, ctx: &PostToolContext) -> Result<HookDecision>;
}

/// Result of running a hook chain.
#[derive(Debug, Clone)]
pub struct ChainResult {
    /// Final input after pre-hook modifications (pre chains only)
    pub input: Option<Value>,
    /// Stop reason if a hook halted the chain
    pub halted: Option<String>,
    /// Hook ids that ran
    pub executed: Vec<String>,
    /// Isolated hook failures, keyed by hook id
    pub errors: Vec<(String, String)>,
    /// Per-hook metadata, keyed by hook id
    pub metadata: HashMap<String, Value>,
}

/// Callback computing a quality score for a captured output.
pub type QualityCallback = Arc<dyn Fn(Uuid, &str, &Value) -> f64 + Send + Sync>;

/// Registry of tool hooks, closed after initialization.
pub struct HookRegistry {
    pre: Vec<Arc<dyn PreToolHook>>,
    post: Vec<Arc<dyn PostToolHook>>,
    initialized: bool,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pre: Vec::new(),
            post: Vec::new(),
            initialized: false,
        }
    }

    /// Register a pre-tool hook. Fails loudly after `initialize()`.
    pub fn register_pre(&mut self, hook: Arc<dyn PreToolHook>) -> Result<()> {
        if self.initialized {
            return Err(Error::RegistryClosed);
        }
        self.pre.push(hook);
        Ok(())
    }

    /// Register a post-tool hook. Fails loudly after `initialize()`.
    pub fn register_post(&mut self, hook: Arc<dyn PostToolHook>) -> Result<()> {
        if self.initialized {
            return Err(Error::RegistryClosed);
        }
        self.post.push(hook);
        Ok(())
    }

    /// Close registration: verify required hooks, fix execution order.
    pub fn initialize(&mut self) -> Result<()> {
        for required in REQUIRED_POST_HOOKS {
            if !self.post.iter().any(|h| h.id() == required) {
                return Err(Error::Validation(format!(
                    "required hook '{required}' is not registered"
                )));
            }
        }
        self.pre.sort_by_key(|h| h.priority());
        self.post.sort_by_key(|h| h.priority());
        self.initialized = true;
        debug!(
            pre = self.pre.len(),
            post = self.post.len(),
            "hook registry initialized"
        );
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run the pre-tool chain; modified input threads through hooks.
    pub async fn run_pre(&self, tool_name: &str, input: Value) -> ChainResult {
        let mut result = ChainResult {
            input: Some(input),
            halted: None,
            executed: Vec::new(),
            errors: Vec::new(),
            metadata: HashMap::new(),
        };
        let mut ctx = PreToolContext {
            tool_name: tool_name.to_string(),
            input: result.input.clone().unwrap_or(Value::Null),
            trajectory_id: None,
        };

        for hook in &self.pre {
            if hook.tool_filter().is_some_and(|f| f != tool_name) {
                continue;
            }
            result.executed.push(hook.id().to_string());
            match hook.handle(&ctx).await {
                Ok(decision) => {
                    if let Some(modified) = decision.modified_input {
                        ctx.input = modified.clone();
                        result.input = Some(modified);
                    }
                    if !decision.metadata.is_null() {
                        result.metadata.insert(hook.id().to_string(), decision.metadata);
                    }
                    if !decision.continue_chain {
                        result.halted = decision.stop_reason;
                        break;
                    }
                }
                Err(err) => {
                    warn!(hook = hook.id(), %err, "pre hook failed, continuing chain");
                    result.errors.push((hook.id().to_string(), err.to_string()));
                }
            }
        }
        result
    }

    /// Run the post-tool chain.
    pub async fn run_post(&self, ctx: &PostToolContext) -> ChainResult {
        let mut result = ChainResult {
            input: None,
            halted: None,
            executed: Vec::new(),
            errors: Vec::new(),
            metadata: HashMap::new(),
        };

        for hook in &self.post {
            if hook.tool_filter().is_some_and(|f| f != ctx.tool_name) {
                continue;
            }
            result.executed.push(hook.id().to_string());
            match hook.handle(ctx).await {
                Ok(decision) => {
                    if !decision.metadata.is_null() {
                        result.metadata.insert(hook.id().to_string(), decision.metadata);
                    }
                    if !decision.continue_chain {
                        result.halted = decision.stop_reason;
                        break;
                    }
                }
                Err(err) => {
                    warn!(hook = hook.id(), %err, "post hook failed, continuing chain");
                    result.errors.push((hook.id().to_string(), err.to_string()));
                }
            }
        }
        result
    }
}

/// Captured tool outputs, ordered by first capture.
#[derive(Debug, Default)]
pub struct TrajectoryStore {
    /// Trajectory ids in first-capture order
    order: Vec<Uuid>,
    outputs: HashMap<Uuid, Vec<String>>,
    completed: std::collections::HashSet<Uuid>,
}

impl TrajectoryStore {
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    #[must_use]
    pub fn outputs_for(&self, trajectory_id: &Uuid) -> Option<&[String]> {
        self.outputs.get(trajectory_id).map(Vec::as_slice)
    }

    pub fn capture(&mut self, trajectory_id: Uuid, output: String) {
        if !self.outputs.contains_key(&trajectory_id) {
            self.order.push(trajectory_id);
        }
        self.outputs.entry(trajectory_id).or_default().push(output);
    }

    /// Mark a trajectory finished; completed trajectories flush first
    /// under memory pressure.
    pub fn mark_complete(&mut self, trajectory_id: Uuid) {
        self.completed.insert(trajectory_id);
    }

    /// Flush completed trajectories, then evict oldest until `target`
    /// entries are gone. Returns the evicted count.
    pub fn evict(&mut self, target: usize) -> usize {
        let mut evicted = 0usize;

        let completed: Vec<Uuid> = self
            .order
            .iter()
            .filter(|id| self.completed.contains(id))
            .copied()
            .collect();
        for id in completed {
            if evicted >= target {
                break;
            }
            self.remove(&id);
            evicted += 1;
        }
        while evicted < target {
            let Some(oldest) = self.order.first().copied() else {
                break;
            };
            self.remove(&oldest);
            evicted += 1;
        }
        evicted
    }

    fn remove(&mut self, trajectory_id: &Uuid) {
        self.outputs.remove(trajectory_id);
        self.completed.remove(trajectory_id);
        self.order.retain(|id| id != trajectory_id);
    }
}

/// Built-in required hook: captures tool output per trajectory.
pub struct TaskResultCapture {
    captures: Arc<Mutex<TrajectoryStore>>,
}

impl TaskResultCapture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            captures: Arc::new(Mutex::new(TrajectoryStore::default())),
        }
    }

    /// Shared handle to the captured trajectories.
    #[must_use]
    pub fn captures(&self) -> Arc<Mutex<TrajectoryStore>> {
        Arc::clone(&self.captures)
    }
}

impl Default for TaskResultCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostToolHook for TaskResultCapture {
    fn id(&self) -> &str {
        "task-result-capture"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn handle(&self, ctx: &PostToolContext) -> Result<HookDecision> {
        // No active trajectory: capture is skipped, not an error.
        let Some(trajectory_id) = ctx.trajectory_id else {
            return Ok(HookDecision::with_metadata(
                serde_json::json!({ "captured": false }),
            ));
        };
        self.captures
            .lock()
            .capture(trajectory_id, ctx.output.clone());
        Ok(HookDecision::with_metadata(
            serde_json::json!({ "captured": true }),
        ))
    }
}

/// Built-in required hook: scores captured output against the feedback
/// and pattern thresholds.
pub struct QualityAssessmentTrigger {
    callback: QualityCallback,
}

impl QualityAssessmentTrigger {
    #[must_use]
    pub fn new(callback: QualityCallback) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl PostToolHook for QualityAssessmentTrigger {
    fn id(&self) -> &str {
        "quality-assessment-trigger"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn handle(&self, ctx: &PostToolContext) -> Result<HookDecision> {
        // Quality assessment is skipped on execution failure and
        // without an active trajectory.
        if ctx.execution_failed || ctx.trajectory_id.is_none() {
            return Ok(HookDecision::with_metadata(
                serde_json::json!({ "assessed": false }),
            ));
        }
        let trajectory_id = ctx.trajectory_id.unwrap_or_default();
        let score = (self.callback)(trajectory_id, &ctx.output, &ctx.metadata);
        Ok(HookDecision::with_metadata(serde_json::json!({
            "assessed": true,
            "score": score,
            "feedbackTriggered": score >= FEEDBACK_THRESHOLD,
            "patternCandidate": score >= PATTERN_THRESHOLD,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OrderProbe {
        id: String,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
        decision: fn() -> HookDecision,
        fail: bool,
    }

    #[async_trait]
    impl PreToolHook for OrderProbe {
        fn id(&self) -> &str {
            &self.id
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        async fn handle(&self, _ctx: &PreToolContext) -> Result<HookDecision> {
            self.log.lock().push(self.id.clone());
            if self.fail {
                return Err(Error::Hook {
                    hook_id: self.id.clone(),
                    cause: "boom".into(),
                });
            }
            Ok((self.decision)())
        }
    }

    fn probe(
        id: &str,
        priority: i32,
        log: &Arc<Mutex<Vec<String>>>,
        decision: fn() -> HookDecision,
        fail: bool,
    ) -> Arc<dyn PreToolHook> {
        Arc::new(OrderProbe {
            id: id.to_string(),
            priority,
            log: Arc::clone(log),
            decision,
            fail,
        })
    }

    fn registry_with_required() -> HookRegistry {
        let mut registry = HookRegistry::new();
        registry
            .register_post(Arc::new(TaskResultCapture::new()))
            .unwrap();
        registry
            .register_post(Arc::new(QualityAssessmentTrigger::new(Arc::new(
                |_, output, _| if output.contains("good") { 0.8 } else { 0.3 },
            ))))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn hooks_run_in_ascending_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry_with_required();
        registry
            .register_pre(probe("late", 50, &log, HookDecision::proceed, false))
            .unwrap();
        registry
            .register_pre(probe("early", 1, &log, HookDecision::proceed, false))
            .unwrap();
        registry.initialize().unwrap();

        registry.run_pre("tool", Value::Null).await;
        assert_eq!(*log.lock(), vec!["early".to_string(), "late".to_string()]);
    }

    #[tokio::test]
    async fn errors_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry_with_required();
        registry
            .register_pre(probe("fails", 1, &log, HookDecision::proceed, true))
            .unwrap();
        registry
            .register_pre(probe("runs", 2, &log, HookDecision::proceed, false))
            .unwrap();
        registry.initialize().unwrap();

        let result = registry.run_pre("tool", Value::Null).await;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0, "fails");
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn halt_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry_with_required();
        registry
            .register_pre(probe("stopper", 1, &log, || HookDecision::halt("policy"), false))
            .unwrap();
        registry
            .register_pre(probe("never", 2, &log, HookDecision::proceed, false))
            .unwrap();
        registry.initialize().unwrap();

        let result = registry.run_pre("tool", Value::Null).await;
        assert_eq!(result.halted.as_deref(), Some("policy"));
        assert_eq!(*log.lock(), vec!["stopper".to_string()]);
    }

    #[tokio::test]
    async fn modified_input_threads_through() {
        struct Rewriter;
        #[async_trait]
        impl PreToolHook for Rewriter {
            fn id(&self) -> &str {
                "rewriter"
            }
            fn priority(&self) -> i32 {
                1
            }
            async fn handle(&self, _ctx: &PreToolContext) -> Result<HookDecision> {
                Ok(HookDecision::modify_input(serde_json::json!({"v": 2})))
            }
        }
        struct Checker;
        #[async_trait]
        impl PreToolHook for Checker {
            fn id(&self) -> &str {
                "checker"
            }
            fn priority(&self) -> i32 {
                2
            }
            async fn handle(&self, ctx: &PreToolContext) -> Result<HookDecision> {
                assert_eq!(ctx.input, serde_json::json!({"v": 2}));
                Ok(HookDecision::proceed())
            }
        }
        let mut registry = registry_with_required();
        registry.register_pre(Arc::new(Rewriter)).unwrap();
        registry.register_pre(Arc::new(Checker)).unwrap();
        registry.initialize().unwrap();

        let result = registry.run_pre("tool", serde_json::json!({"v": 1})).await;
        assert_eq!(result.input, Some(serde_json::json!({"v": 2})));
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn registration_closes_at_initialize() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry_with_required();
        registry.initialize().unwrap();
        let err = registry
            .register_pre(probe("late", 1, &log, HookDecision::proceed, false))
            .unwrap_err();
        assert!(matches!(err, Error::RegistryClosed));
    }

    #[tokio::test]
    async fn missing_required_hooks_fail_initialize() {
        let mut registry = HookRegistry::new();
        registry
            .register_post(Arc::new(TaskResultCapture::new()))
            .unwrap();
        assert!(registry.initialize().is_err());
    }

    #[tokio::test]
    async fn capture_skips_without_trajectory() {
        let capture = TaskResultCapture::new();
        let captures = capture.captures();
        let mut registry = HookRegistry::new();
        registry.register_post(Arc::new(capture)).unwrap();
        registry
            .register_post(Arc::new(QualityAssessmentTrigger::new(Arc::new(
                |_, _, _| 0.9,
            ))))
            .unwrap();
        registry.initialize().unwrap();

        let ctx = PostToolContext {
            tool_name: "tool".into(),
            output: "result".into(),
            trajectory_id: None,
            execution_failed: false,
            metadata: Value::Null,
        };
        let result = registry.run_post(&ctx).await;
        assert!(captures.lock().is_empty());
        assert_eq!(
            result.metadata["task-result-capture"]["captured"],
            Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn quality_thresholds_expose_in_metadata() {
        let mut registry = registry_with_required();
        registry.initialize().unwrap();
        let trajectory = Uuid::new_v4();

        let good = PostToolContext {
            tool_name: "tool".into(),
            output: "good output".into(),
            trajectory_id: Some(trajectory),
            execution_failed: false,
            metadata: Value::Null,
        };
        let result = registry.run_post(&good).await;
        let meta = &result.metadata["quality-assessment-trigger"];
        assert_eq!(meta["feedbackTriggered"], Value::Bool(true));
        assert_eq!(meta["patternCandidate"], Value::Bool(true));

        let poor = PostToolContext {
            output: "poor output".into(),
            ..good.clone()
        };
        let result = registry.run_post(&poor).await;
        let meta = &result.metadata["quality-assessment-trigger"];
        assert_eq!(meta["feedbackTriggered"], Value::Bool(false));
        assert_eq!(meta["patternCandidate"], Value::Bool(false));
    }

    #[test]
    fn trajectory_eviction_flushes_completed_first() {
        let mut store = TrajectoryStore::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let third = Uuid::new_v4();
        store.capture(first, "one".into());
        store.capture(second, "two".into());
        store.capture(third, "three".into());
        store.mark_complete(second);

        // One slot needed: the completed trajectory goes first.
        assert_eq!(store.evict(1), 1);
        assert!(store.outputs_for(&second).is_none());
        assert!(store.outputs_for(&first).is_some());

        // Next eviction falls back to oldest.
        assert_eq!(store.evict(1), 1);
        assert!(store.outputs_for(&first).is_none());
        assert!(store.outputs_for(&third).is_some());
    }

    #[tokio::test]
    async fn quality_skipped_on_execution_failure() {
        let mut registry = registry_with_required();
        registry.initialize().unwrap();
        let ctx = PostToolContext {
            tool_name: "tool".into(),
            output: "good output".into(),
            trajectory_id: Some(Uuid::new_v4()),
            execution_failed: true,
            metadata: Value::Null,
        };
        let result = registry.run_post(&ctx).await;
        assert_eq!(
            result.metadata["quality-assessment-trigger"]["assessed"],
            Value::Bool(false)
        );
    }
}
