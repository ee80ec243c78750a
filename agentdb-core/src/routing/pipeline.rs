//! Sequential multi-stage pipeline planning over the routing engine.
//!
//! Task text is split on a closed set of sequence markers, each segment
//! is routed independently, and stages are chained with linear
//! dependencies. Stage outputs persist under `pipeline/<id>/stage_<n>`
//! domains so downstream stages can retrieve them.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::engine::{ConfirmationLevel, RoutingEngine};
use crate::capability::CapabilityIndex;
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};

/// Maximum stages a pipeline may have.
pub const DEFAULT_MAX_STAGES: usize = 10;

/// Sequence markers, longest first so multi-word markers win.
/// Single-word markers only match on word boundaries.
const MARKERS: [&str; 10] = [
    "following that",
    "once complete",
    "after that",
    "and then",
    "subsequently",
    "afterwards",
    "finally",
    "next",
    "then",
    "after",
];

/// Closed action-verb set used to tag each stage.
const ACTION_VERBS: [&str; 16] = [
    "research", "draft", "write", "review", "analyze", "implement", "test", "plan",
    "summarize", "design", "refactor", "document", "evaluate", "deploy", "fix", "build",
];

/// Default per-stage timeout.
const STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default per-stage quality gate.
const STAGE_MIN_QUALITY: f64 = 0.5;

/// Rough per-stage duration estimate used for pipeline totals.
const STAGE_ESTIMATE: Duration = Duration::from_secs(60);

/// One planned stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStage {
    pub index: usize,
    /// The raw task segment
    pub name: String,
    /// Primary verb from the closed action set, if one was found
    pub action_verb: Option<String>,
    /// Agent selected by routing
    pub agent_key: String,
    pub confidence: f64,
    pub level: ConfirmationLevel,
    /// Prompt template; `{input}` is replaced with the prior stage output
    pub prompt_template: String,
    pub timeout_secs: u64,
    pub min_quality: f64,
    /// Indices of stages this stage depends on (always linear)
    pub depends_on: Vec<usize>,
    /// Episode domain the stage output persists under
    pub output_domain: String,
    pub estimated_duration_secs: u64,
}

/// A generated pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    pub pipeline_id: Uuid,
    pub stages: Vec<PipelineStage>,
    /// Minimum stage confidence
    pub overall_confidence: f64,
    pub total_estimated_secs: u64,
}

/// A task segment with its query embedding, ready for routing.
#[derive(Debug, Clone)]
pub struct StagedSegment {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Plans pipelines from multi-step task strings.
pub struct PipelineGenerator {
    max_stages: usize,
}

impl Default for PipelineGenerator {
    fn default() -> Self {
        Self {
            max_stages: DEFAULT_MAX_STAGES,
        }
    }
}

impl PipelineGenerator {
    #[must_use]
    pub fn new(max_stages: usize) -> Self {
        Self { max_stages }
    }

    /// Split a task string on the sequence markers.
    ///
    /// Longest-match-first; single-word markers require word boundaries
    /// on both sides.
    #[must_use]
    pub fn split_stages(task: &str) -> Vec<String> {
        let lower = task.to_lowercase();
        // Lowercasing can change byte length outside ASCII; slice the
        // lowered text in that case so offsets stay valid.
        let source: &str = if lower.len() == task.len() { task } else { &lower };
        let bytes = lower.as_bytes();
        let mut segments = Vec::new();
        let mut start = 0usize;
        let mut pos = 0usize;

        while pos < lower.len() {
            let mut matched = None;
            for marker in MARKERS {
                if lower[pos..].starts_with(marker)
                    && is_word_bounded(bytes, pos, marker.len())
                {
                    matched = Some(marker.len());
                    break;
                }
            }
            match matched {
                Some(len) => {
                    segments.push(source[start..pos].to_string());
                    pos += len;
                    start = pos;
                }
                None => {
                    // Advance one character, respecting UTF-8 boundaries.
                    pos += 1;
                    while pos < lower.len() && !lower.is_char_boundary(pos) {
                        pos += 1;
                    }
                }
            }
        }
        segments.push(source[start..].to_string());

        segments
            .into_iter()
            .map(|s| s.trim().trim_matches(|c| c == ',' || c == '.').trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Split a task and embed each segment.
    ///
    /// The async half of generation; `assemble` finishes synchronously
    /// so daemon callers can route under a short-lived lock.
    pub async fn embed_stages(
        &self,
        task: &str,
        engine: &RoutingEngine,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<StagedSegment>> {
        let segments = Self::split_stages(task);
        if segments.len() < 2 {
            return Err(Error::Validation(
                "task does not split into multiple stages".into(),
            ));
        }
        if segments.len() > self.max_stages {
            return Err(Error::Validation(format!(
                "task splits into {} stages, max is {}",
                segments.len(),
                self.max_stages
            )));
        }

        let mut staged = Vec::with_capacity(segments.len());
        for (index, text) in segments.into_iter().enumerate() {
            let embedding = engine
                .embed_task(&text, provider)
                .await
                .map_err(|err| Error::PipelineStage {
                    stage: index,
                    cause: err.to_string(),
                })?;
            staged.push(StagedSegment { text, embedding });
        }
        Ok(staged)
    }

    /// Generate a pipeline for a multi-step task.
    pub async fn generate(
        &self,
        task: &str,
        engine: &RoutingEngine,
        provider: &dyn EmbeddingProvider,
        index: &CapabilityIndex,
    ) -> Result<PipelineDefinition> {
        let staged = self.embed_stages(task, engine, provider).await?;
        self.assemble(&staged, engine, index)
    }

    /// Route each embedded segment and chain the stages.
    pub fn assemble(
        &self,
        staged: &[StagedSegment],
        engine: &RoutingEngine,
        index: &CapabilityIndex,
    ) -> Result<PipelineDefinition> {
        let pipeline_id = Uuid::new_v4();
        let mut stages = Vec::with_capacity(staged.len());
        let mut overall_confidence = f64::INFINITY;

        for (index_in_pipeline, staged_segment) in staged.iter().enumerate() {
            let segment = &staged_segment.text;
            let decision = engine
                .route_embedded(segment, &staged_segment.embedding, &[], index)
                .map_err(|err| Error::PipelineStage {
                    stage: index_in_pipeline,
                    cause: err.to_string(),
                })?;

            overall_confidence = overall_confidence.min(decision.confidence);
            let depends_on = if index_in_pipeline == 0 {
                Vec::new()
            } else {
                vec![index_in_pipeline - 1]
            };

            stages.push(PipelineStage {
                index: index_in_pipeline,
                name: segment.clone(),
                action_verb: extract_verb(segment),
                agent_key: decision.selected.agent_key,
                confidence: decision.confidence,
                level: decision.level,
                prompt_template: format!("{segment}\n\nPrior stage output:\n{{input}}"),
                timeout_secs: STAGE_TIMEOUT.as_secs(),
                min_quality: STAGE_MIN_QUALITY,
                depends_on,
                output_domain: format!("pipeline/{pipeline_id}/stage_{index_in_pipeline}"),
                estimated_duration_secs: STAGE_ESTIMATE.as_secs(),
            });
        }

        let total_estimated_secs = stages.iter().map(|s| s.estimated_duration_secs).sum();
        debug!(%pipeline_id, stages = stages.len(), overall_confidence, "pipeline generated");

        Ok(PipelineDefinition {
            pipeline_id,
            stages,
            overall_confidence,
            total_estimated_secs,
        })
    }
}

/// First word of the segment that belongs to the closed action-verb set.
fn extract_verb(segment: &str) -> Option<String> {
    segment
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .find(|w| ACTION_VERBS.contains(&w.as_str()))
}

/// Word-boundary check for a marker match at `pos` of length `len`.
fn is_word_bounded(bytes: &[u8], pos: usize, len: usize) -> bool {
    let before_ok = pos == 0 || !bytes[pos - 1].is_ascii_alphanumeric();
    let after = pos + len;
    let after_ok = after >= bytes.len() || !bytes[after].is_ascii_alphanumeric();
    before_ok && after_ok
}
