//! Environment-backed configuration for the memory substrate.
//!
//! Every knob has a concrete default so a daemon can start with no
//! configuration at all; `AGENTDB_*` environment variables override.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default embedding dimension (matches common embedding endpoints)
pub const DEFAULT_DIMENSION: usize = 1536;

/// Default Unix socket path for the daemon
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/agentdb.sock";

/// Default data directory, relative to the working directory
pub const DEFAULT_DATA_DIR: &str = ".agentdb";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Embedding dimension D, fixed for the process lifetime
    pub dimension: usize,
    /// Data directory (PID file, persisted index, episode log)
    pub data_dir: PathBuf,
    /// Capability cache directory
    pub cache_dir: PathBuf,
    /// Unix socket the daemon binds
    pub socket_path: PathBuf,
    /// Embedding endpoint URL, if an HTTP provider is used
    pub embedding_url: Option<String>,
    /// Agents directory scanned for capability definitions
    pub agents_dir: PathBuf,
    /// Whether clients may spawn the daemon on demand
    pub auto_start: bool,
    /// Raise log verbosity
    pub verbose: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            dimension: DEFAULT_DIMENSION,
            cache_dir: data_dir.join("capability-cache"),
            agents_dir: PathBuf::from("agents"),
            data_dir,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            embedding_url: None,
            auto_start: false,
            verbose: false,
        }
    }
}

impl MemoryConfig {
    /// Build a config from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dim) = env_var("AGENTDB_DIMENSION").and_then(|v| v.parse().ok()) {
            config.dimension = dim;
        }
        if let Some(dir) = env_var("AGENTDB_DATA_DIR") {
            config.data_dir = PathBuf::from(&dir);
            config.cache_dir = config.data_dir.join("capability-cache");
        }
        if let Some(dir) = env_var("AGENTDB_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_var("AGENTDB_SOCKET") {
            config.socket_path = PathBuf::from(path);
        }
        if let Some(url) = env_var("AGENTDB_EMBEDDING_URL") {
            config.embedding_url = Some(url);
        }
        if let Some(dir) = env_var("AGENTDB_AGENTS_DIR") {
            config.agents_dir = PathBuf::from(dir);
        }
        if let Some(flag) = env_var("AGENTDB_AUTO_START") {
            config.auto_start = is_truthy(&flag);
        }
        if let Some(flag) = env_var("AGENTDB_VERBOSE") {
            config.verbose = is_truthy(&flag);
        }

        config
    }

    /// Path of the daemon PID file.
    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join("memory-server.pid")
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
