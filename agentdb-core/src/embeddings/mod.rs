//! Embedding generation for episodes, capabilities, and routing queries.
//!
//! The model itself is external; this module holds the provider trait,
//! the HTTP client for the configured endpoint, and a deterministic mock
//! used throughout the test suite.

pub mod http;
pub mod mock;
pub mod provider;

pub use mock::{FixtureEmbedder, MockEmbedder};
pub use provider::EmbeddingProvider;

#[cfg(feature = "http-embeddings")]
pub use http::HttpEmbedder;
