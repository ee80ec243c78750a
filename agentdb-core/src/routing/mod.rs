//! Capability-based routing and pipeline planning.

pub mod engine;
pub mod pipeline;

pub use engine::{
    ConfirmationLevel, RouteCandidate, RoutingConfig, RoutingDecision, RoutingEngine,
    RoutingWeights,
};
pub use pipeline::{
    PipelineDefinition, PipelineGenerator, PipelineStage, StagedSegment, DEFAULT_MAX_STAGES,
};
