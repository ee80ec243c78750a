#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

//! # AgentDB Core
//!
//! Content-addressed episode memory for AI agents: vector retrieval,
//! tiered compression, capability-based routing, and the supporting
//! monitors and hooks.
//!
//! ## Core Concepts
//!
//! - **Episodes**: prior tasks with their answers, vectorized for retrieval
//! - **Tiers**: one-way compression lifecycle driven by access heat
//! - **Capabilities**: embedded agent skill records behind a content-hash cache
//! - **Routing**: graduated-confidence agent selection and pipeline planning
//!
//! ## Module Organization
//!
//! ### Primary APIs
//! - [`episode`]: episode store and retrieval filtering
//! - [`index`]: HNSW approximate-nearest-neighbor search
//! - [`compress`]: codecs, PQ training, and the tier lifecycle
//! - [`capability`]: agent capability index and atomic cache
//! - [`routing`]: routing engine and pipeline generator
//!
//! ### Support Modules
//! - [`embeddings`]: embedding provider trait, HTTP client, test mock
//! - [`hooks`]: pre/post tool-use hook registry and executor
//! - [`monitor`]: memory budgets, eviction, token accounting
//! - [`events`]: activity event bus
//! - [`provenance`]: citation graph with L-Scores
//!
//! ## Quick Start
//!
//! ```no_run
//! use agentdb_core::embeddings::MockEmbedder;
//! use agentdb_core::episode::{EpisodeStore, NewEpisode, RetrievalOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> agentdb_core::Result<()> {
//! let embedder = MockEmbedder::new(1536);
//! let mut store = EpisodeStore::with_dimension(1536);
//!
//! let id = store
//!     .store(
//!         NewEpisode {
//!             task_text: "Implement authentication".into(),
//!             answer_text: "Used argon2 with a session token".into(),
//!             agent_type: "coder".into(),
//!             reasoning_trace: None,
//!             domain: "coding".into(),
//!             tags: vec!["auth".into()],
//!         },
//!         &embedder,
//!     )
//!     .await?;
//! store.record_outcome(&id, true)?;
//!
//! let relevant = store
//!     .retrieve("Add authorization", &RetrievalOptions::default(), &embedder)
//!     .await?;
//! println!("Found {} relevant episodes", relevant.len());
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod compress;
pub mod config;
pub mod embeddings;
pub mod episode;
pub mod error;
pub mod events;
pub mod hooks;
pub mod index;
pub mod monitor;
pub mod provenance;
pub mod retry;
pub mod routing;
pub mod vector;

pub use config::MemoryConfig;
pub use error::{CacheMissReason, Error, Result};
