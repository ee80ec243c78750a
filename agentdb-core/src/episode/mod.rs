//! Episode storage and retrieval filtering.

pub mod retrieval;
pub mod store;
pub mod types;

pub use retrieval::{
    ConfidenceLevel, RetrievalOptions, RetrievedEpisode, CODING_SIMILARITY_THRESHOLD,
    DEFAULT_SIMILARITY_THRESHOLD, WARNING_SUCCESS_RATE,
};
pub use store::{EpisodeStore, NewEpisode};
pub use types::{Episode, Phase, MIN_OUTCOMES};
