//! Service wiring and RPC dispatch.
//!
//! Owns the episode store, capability index, routing engine, hooks,
//! monitors, and event bus. Embedding always happens before a lock is
//! taken; the in-memory maps are only ever touched synchronously.

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use agentdb_core::capability::{CapabilityIndex, Domain};
use agentdb_core::embeddings::EmbeddingProvider;
use agentdb_core::episode::{EpisodeStore, NewEpisode, RetrievalOptions};
use agentdb_core::events::{ActivityBus, EventKind};
use agentdb_core::hooks::{
    HookRegistry, QualityAssessmentTrigger, TaskResultCapture, TrajectoryStore,
};
use agentdb_core::monitor::{
    BudgetComponent, BudgetMonitor, CacheAdapter, MemoryBudgets, TokenTracker, TokenUsage,
    DEFAULT_FLUSH_LIMIT,
};
use agentdb_core::routing::{PipelineGenerator, RoutingConfig, RoutingEngine};
use agentdb_core::{Error, MemoryConfig};

use crate::jsonrpc::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};

/// Budget check cadence.
const BUDGET_CHECK_PERIOD: Duration = Duration::from_secs(60);

/// A dispatch failure, mapped onto the JSON-RPC error surface.
#[derive(Debug)]
pub enum DispatchError {
    MethodNotFound(String),
    InvalidParams(String),
    Internal(Error),
}

impl DispatchError {
    #[must_use]
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::MethodNotFound(method) => format!("method not found: {method}"),
            Self::InvalidParams(detail) => format!("invalid params: {detail}"),
            Self::Internal(err) => err.to_string(),
        }
    }

    /// Typed code carried in `error.data.code`.
    #[must_use]
    pub fn typed_code(&self) -> &'static str {
        match self {
            Self::MethodNotFound(_) => "METHOD_NOT_FOUND",
            Self::InvalidParams(_) => "INVALID_PARAMS",
            Self::Internal(err) => err.code(),
        }
    }
}

impl From<Error> for DispatchError {
    fn from(err: Error) -> Self {
        Self::Internal(err)
    }
}

type DispatchResult = Result<Value, DispatchError>;

/// The daemon's service state.
pub struct MemoryService {
    config: MemoryConfig,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<RwLock<EpisodeStore>>,
    capability: Arc<RwLock<CapabilityIndex>>,
    routing: RoutingEngine,
    pipeline: PipelineGenerator,
    hooks: HookRegistry,
    trajectories: Arc<Mutex<TrajectoryStore>>,
    tokens: Arc<Mutex<TokenTracker>>,
    monitor: Arc<BudgetMonitor>,
    events: Arc<ActivityBus>,
    started_at: Instant,
}

impl MemoryService {
    /// Build and initialize all subsystems.
    pub async fn initialize(
        config: MemoryConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> agentdb_core::Result<Arc<Self>> {
        let store = Arc::new(RwLock::new(EpisodeStore::with_dimension(config.dimension)));

        let mut capability = CapabilityIndex::new(
            config.agents_dir.clone(),
            config.cache_dir.clone(),
            config.dimension,
        );
        capability.load_or_rebuild(provider.as_ref()).await?;
        let capability = Arc::new(RwLock::new(capability));

        let capture = TaskResultCapture::new();
        let trajectories = capture.captures();
        let mut hooks = HookRegistry::new();
        hooks.register_post(Arc::new(capture))?;
        hooks.register_post(Arc::new(QualityAssessmentTrigger::new(Arc::new(
            default_quality_score,
        ))))?;
        hooks.initialize()?;

        let tokens = Arc::new(Mutex::new(TokenTracker::new(DEFAULT_FLUSH_LIMIT)));
        let monitor = Arc::new(BudgetMonitor::new(MemoryBudgets::default()));
        monitor.register(Arc::new(EpisodeCacheAdapter {
            store: Arc::clone(&store),
        }));
        monitor.register(Arc::new(EmbeddingCacheAdapter {
            store: Arc::clone(&store),
        }));
        monitor.register(Arc::new(TrajectoryCacheAdapter {
            trajectories: Arc::clone(&trajectories),
        }));

        info!(
            dimension = config.dimension,
            agents = capability.read().len(),
            "memory service initialized"
        );

        Ok(Arc::new(Self {
            config,
            provider,
            store,
            capability,
            routing: RoutingEngine::new(RoutingConfig::default()),
            pipeline: PipelineGenerator::default(),
            hooks,
            trajectories,
            tokens,
            monitor,
            events: Arc::new(ActivityBus::default()),
            started_at: Instant::now(),
        }))
    }

    /// Start the background maintenance tasks.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let monitor = Arc::clone(&self.monitor);
        let budget_task = agentdb_core::monitor::spawn_budget_checks(monitor, BUDGET_CHECK_PERIOD);

        // Tier maintenance shares the store's compression manager via a
        // dedicated task ticking through the store lock.
        let store = Arc::clone(&self.store);
        let period = store.read().compression().config().auto_transition_interval;
        let events = Arc::clone(&self.events);
        let transition_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let transitions = {
                    let mut guard = store.write();
                    let manager = guard.compression_mut();
                    if !manager.codebooks_trained() && manager.ready_to_train() {
                        if let Err(err) = manager.train_codebooks() {
                            tracing::warn!(%err, "scheduled codebook training failed");
                        }
                    }
                    manager.decay_heat();
                    manager.check_transitions()
                };
                for transition in &transitions {
                    events.emit(
                        EventKind::TierTransition,
                        json!({
                            "vectorId": transition.vector_id,
                            "from": transition.from,
                            "to": transition.to,
                        }),
                    );
                }
            }
        });
        vec![budget_task, transition_task]
    }

    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &Arc<ActivityBus> {
        &self.events
    }

    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Dispatch one RPC method.
    pub async fn dispatch(
        &self,
        session_id: &str,
        method: &str,
        params: Option<Value>,
    ) -> DispatchResult {
        debug!(session_id, method, "dispatching");
        let result = match method {
            "ping" => self.ping(),
            "health.check" => self.health_check(),
            "health.metrics" => self.health_metrics(),
            "episode.retrieve" => self.episode_retrieve(params, false).await,
            "episode.inject" => self.episode_retrieve(params, true).await,
            "episode.record" => self.episode_record(params),
            "desc.retrieve" => self.desc_retrieve(params, false).await,
            "desc.inject" => self.desc_retrieve(params, true).await,
            "capability.lookup" => self.capability_lookup(params),
            "route.select" => self.route(params, false).await,
            "route.explain" => self.route(params, true).await,
            "pipeline.generate" => self.pipeline_generate(params).await,
            "memory.store" => self.memory_store(params).await,
            "memory.getByDomain" => self.memory_get_by_domain(params),
            "memory.getByTags" => self.memory_get_by_tags(params),
            "memory.delete" => self.memory_delete(params),
            "feedback.provide" => self.feedback_provide(params),
            "pattern.query" => self.pattern_query(params),
            _ => Err(DispatchError::MethodNotFound(method.to_string())),
        };
        self.account(session_id, method, &result);
        result
    }

    fn ping(&self) -> DispatchResult {
        Ok(json!({
            "pong": true,
            "uptimeMs": self.uptime().as_millis() as u64,
        }))
    }

    fn health_check(&self) -> DispatchResult {
        let store = self.store.read();
        Ok(json!({
            "status": "ready",
            "uptimeMs": self.uptime().as_millis() as u64,
            "episodes": store.len(),
            "vectors": store.compression().len(),
            "agents": self.capability.read().len(),
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }

    fn health_metrics(&self) -> DispatchResult {
        let compression = self.store.read().compression().stats();
        let alerts = self.monitor.check();
        Ok(json!({
            "compression": compression,
            "budgetAlerts": alerts,
            "tokensBuffered": self.tokens.lock().buffered(),
            "trajectories": self.trajectories.lock().len(),
            "recentEvents": self.events.recent(20),
        }))
    }

    async fn episode_retrieve(&self, params: Option<Value>, inject: bool) -> DispatchResult {
        #[derive(Deserialize)]
        struct Params {
            query: String,
            #[serde(flatten)]
            options: RetrievalOptions,
        }
        let Params { query, mut options } = parse_params(params)?;
        if inject && options.min_confidence.is_none() {
            options.min_confidence = Some(agentdb_core::episode::ConfidenceLevel::Low);
        }

        let embedding = self.embed(&query).await?;
        let results = self
            .store
            .read()
            .retrieve_embedded(&query, &embedding, &options)?;
        self.events.emit(
            EventKind::EpisodeRetrieved,
            json!({ "query": query, "results": results.len(), "inject": inject }),
        );
        Ok(serde_json::to_value(results).map_err(Error::from)?)
    }

    fn episode_record(&self, params: Option<Value>) -> DispatchResult {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            episode_id: Uuid,
            success: bool,
        }
        let Params { episode_id, success } = parse_params(params)?;
        let mut store = self.store.write();
        store.record_outcome(&episode_id, success)?;
        let episode = store
            .get(&episode_id)
            .ok_or_else(|| Error::NotFound(episode_id.to_string()))?;
        self.events.emit(
            EventKind::OutcomeRecorded,
            json!({ "episodeId": episode_id, "success": success }),
        );
        Ok(json!({
            "successes": episode.successes,
            "failures": episode.failures,
        }))
    }

    async fn desc_retrieve(&self, params: Option<Value>, inject: bool) -> DispatchResult {
        // Description memory is the episode store pinned to its domain.
        let mut params = params.unwrap_or_else(|| json!({}));
        if let Some(map) = params.as_object_mut() {
            map.insert("domain".to_string(), json!("desc"));
        }
        self.episode_retrieve(Some(params), inject).await
    }

    fn capability_lookup(&self, params: Option<Value>) -> DispatchResult {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            agent_key: String,
        }
        let Params { agent_key } = parse_params(params)?;
        let capability = self.capability.read();
        let entry = capability
            .get(&agent_key)
            .ok_or_else(|| Error::NotFound(agent_key.clone()))?;
        Ok(json!({
            "agentKey": entry.agent_key,
            "name": entry.name,
            "description": entry.description,
            "domains": entry.domains,
            "keywords": entry.keywords,
            "successRate": entry.success_rate,
            "taskCount": entry.task_count,
            "indexedAt": entry.indexed_at,
            "embeddingDimension": entry.embedding.len(),
        }))
    }

    async fn route(&self, params: Option<Value>, explain: bool) -> DispatchResult {
        #[derive(Deserialize)]
        struct Params {
            task: String,
            #[serde(default)]
            domains: Vec<String>,
        }
        let Params { task, domains } = parse_params(params)?;
        let domains: Vec<Domain> = domains.iter().filter_map(|d| Domain::parse(d)).collect();

        let embedding = self
            .routing
            .embed_task(&task, self.provider.as_ref())
            .await?;
        let decision = {
            let capability = self.capability.read();
            self.routing
                .route_embedded(&task, &embedding, &domains, &capability)?
        };
        self.events.emit(
            EventKind::RouteSelected,
            json!({
                "agent": decision.selected.agent_key,
                "confidence": decision.confidence,
                "level": decision.level,
            }),
        );

        if explain {
            let uncertainty = decision.uncertainty;
            Ok(json!({
                "decision": decision,
                "weights": RoutingConfig::default().weights,
                "uncertainty": uncertainty,
            }))
        } else {
            Ok(serde_json::to_value(decision).map_err(Error::from)?)
        }
    }

    async fn pipeline_generate(&self, params: Option<Value>) -> DispatchResult {
        #[derive(Deserialize)]
        struct Params {
            task: String,
        }
        let Params { task } = parse_params(params)?;
        let staged = self
            .pipeline
            .embed_stages(&task, &self.routing, self.provider.as_ref())
            .await?;
        let definition = {
            let capability = self.capability.read();
            self.pipeline.assemble(&staged, &self.routing, &capability)?
        };
        self.events.emit(
            EventKind::PipelineGenerated,
            json!({
                "pipelineId": definition.pipeline_id,
                "stages": definition.stages.len(),
            }),
        );
        Ok(serde_json::to_value(definition).map_err(Error::from)?)
    }

    async fn memory_store(&self, params: Option<Value>) -> DispatchResult {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            task_text: String,
            answer_text: String,
            #[serde(default = "default_agent_type")]
            agent_type: String,
            #[serde(default)]
            reasoning_trace: Option<String>,
            #[serde(default = "default_domain")]
            domain: String,
            #[serde(default)]
            tags: Vec<String>,
        }
        fn default_agent_type() -> String {
            "unknown".to_string()
        }
        fn default_domain() -> String {
            "general".to_string()
        }

        let params: Params = parse_params(params)?;
        let embedding = self.embed(&params.task_text).await?;
        let episode_id = self.store.write().store_embedded(
            NewEpisode {
                task_text: params.task_text,
                answer_text: params.answer_text,
                agent_type: params.agent_type,
                reasoning_trace: params.reasoning_trace,
                domain: params.domain,
                tags: params.tags,
            },
            embedding,
        )?;
        self.events
            .emit(EventKind::EpisodeStored, json!({ "episodeId": episode_id }));
        Ok(json!({ "episodeId": episode_id }))
    }

    fn memory_get_by_domain(&self, params: Option<Value>) -> DispatchResult {
        #[derive(Deserialize)]
        struct Params {
            domain: String,
        }
        let Params { domain } = parse_params(params)?;
        let store = self.store.read();
        let episodes: Vec<Value> = store
            .get_by_domain(&domain)
            .into_iter()
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
            .collect();
        Ok(json!({ "episodes": episodes }))
    }

    fn memory_get_by_tags(&self, params: Option<Value>) -> DispatchResult {
        #[derive(Deserialize)]
        struct Params {
            tags: Vec<String>,
        }
        let Params { tags } = parse_params(params)?;
        let store = self.store.read();
        let episodes: Vec<Value> = store
            .get_by_tags(&tags)
            .into_iter()
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
            .collect();
        Ok(json!({ "episodes": episodes }))
    }

    fn memory_delete(&self, params: Option<Value>) -> DispatchResult {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            episode_id: Uuid,
        }
        let Params { episode_id } = parse_params(params)?;
        self.store.write().delete(&episode_id)?;
        Ok(json!({ "deleted": true }))
    }

    fn feedback_provide(&self, params: Option<Value>) -> DispatchResult {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            #[serde(default)]
            episode_id: Option<Uuid>,
            #[serde(default)]
            agent_key: Option<String>,
            success: bool,
        }
        let params: Params = parse_params(params)?;
        if params.episode_id.is_none() && params.agent_key.is_none() {
            return Err(DispatchError::InvalidParams(
                "feedback requires episodeId or agentKey".into(),
            ));
        }
        if let Some(episode_id) = params.episode_id {
            self.store.write().record_outcome(&episode_id, params.success)?;
        }
        if let Some(agent_key) = &params.agent_key {
            self.capability
                .write()
                .record_outcome(agent_key, params.success)?;
        }
        Ok(json!({ "recorded": true }))
    }

    fn pattern_query(&self, params: Option<Value>) -> DispatchResult {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase", default)]
        struct Params {
            min_success_rate: f64,
            min_outcomes: u32,
        }
        impl Default for Params {
            fn default() -> Self {
                Self {
                    min_success_rate: 0.7,
                    min_outcomes: agentdb_core::episode::MIN_OUTCOMES,
                }
            }
        }
        let params: Params = parse_params(params)?;
        let store = self.store.read();
        let mut patterns: Vec<Value> = Vec::new();
        for episode in store.episodes() {
            if episode.outcome_count() < params.min_outcomes {
                continue;
            }
            if let Some(rate) = episode.success_rate() {
                if rate >= params.min_success_rate {
                    patterns.push(json!({
                        "episodeId": episode.episode_id,
                        "taskText": episode.task_text,
                        "agentType": episode.agent_type,
                        "domain": episode.domain,
                        "successRate": rate,
                        "outcomes": episode.outcome_count(),
                    }));
                }
            }
        }
        Ok(json!({ "patterns": patterns }))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, Error> {
        self.provider
            .embed_text(text)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))
    }

    /// Rough per-request token accounting into the bounded tracker.
    fn account(&self, session_id: &str, method: &str, result: &DispatchResult) {
        let output_tokens = match result {
            Ok(value) => value.to_string().len() as u64 / 4,
            Err(_) => 0,
        };
        self.tokens.lock().record(TokenUsage {
            session_id: session_id.to_string(),
            request_id: Uuid::new_v4().to_string(),
            input_tokens: method.len() as u64 / 4,
            output_tokens,
            task_type: method.to_string(),
            agent_id: "daemon".to_string(),
            trajectory_id: None,
            recorded_at: chrono::Utc::now(),
        });
    }
}

/// Default quality heuristic for captured outputs.
fn default_quality_score(_trajectory: Uuid, output: &str, _metadata: &Value) -> f64 {
    if output.trim().is_empty() {
        return 0.0;
    }
    let lowered = output.to_lowercase();
    if lowered.contains("error") || lowered.contains("failed") {
        return 0.3;
    }
    (0.5 + output.len() as f64 / 2000.0).min(0.9)
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
) -> Result<T, DispatchError> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|err| DispatchError::InvalidParams(err.to_string()))
}

struct EpisodeCacheAdapter {
    store: Arc<RwLock<EpisodeStore>>,
}

impl CacheAdapter for EpisodeCacheAdapter {
    fn component(&self) -> BudgetComponent {
        BudgetComponent::EpisodeCache
    }
    fn usage(&self) -> u64 {
        self.store.read().len() as u64
    }
    fn evict(&self, fraction: f64) -> Result<u64, String> {
        Ok(self.store.write().evict_fraction(fraction))
    }
}

struct EmbeddingCacheAdapter {
    store: Arc<RwLock<EpisodeStore>>,
}

impl CacheAdapter for EmbeddingCacheAdapter {
    fn component(&self) -> BudgetComponent {
        BudgetComponent::EmbeddingCache
    }
    fn usage(&self) -> u64 {
        self.store.read().compression().stats().compressed_bytes as u64
    }
    fn evict(&self, fraction: f64) -> Result<u64, String> {
        Ok(self.store.write().evict_fraction(fraction))
    }
}

struct TrajectoryCacheAdapter {
    trajectories: Arc<Mutex<TrajectoryStore>>,
}

impl CacheAdapter for TrajectoryCacheAdapter {
    fn component(&self) -> BudgetComponent {
        BudgetComponent::TrajectoryCache
    }
    fn usage(&self) -> u64 {
        self.trajectories.lock().len() as u64
    }
    fn evict(&self, fraction: f64) -> Result<u64, String> {
        let mut trajectories = self.trajectories.lock();
        let target = ((trajectories.len() as f64) * fraction).ceil() as usize;
        Ok(trajectories.evict(target) as u64)
    }
}
