/// Result type alias for memory substrate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a capability cache on disk was rejected and must be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMissReason {
    /// `hash.txt` sentinel is absent
    MissingSentinel,
    /// Stored hash no longer matches the agents directory
    HashMismatch,
    /// `cacheFormatVersion` is not the supported version
    FormatVersion(u32),
    /// A cache file failed to parse
    Corrupt(String),
    /// A sampled embedding had the wrong dimension
    DimensionMismatch { expected: usize, actual: usize },
    /// Declared entry count disagrees with the parsed entries
    CountMismatch { declared: usize, actual: usize },
}

impl std::fmt::Display for CacheMissReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSentinel => write!(f, "hash sentinel missing"),
            Self::HashMismatch => write!(f, "content hash mismatch"),
            Self::FormatVersion(v) => write!(f, "unsupported cache format version {v}"),
            Self::Corrupt(what) => write!(f, "corrupt cache file: {what}"),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "embedding dimension {actual}, expected {expected}")
            }
            Self::CountMismatch { declared, actual } => {
                write!(f, "declared {declared} entries, found {actual}")
            }
        }
    }
}

/// Error types for the memory substrate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Dimension mismatch: got {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Codec not trained for tier {0}")]
    CodecNotTrained(crate::compress::Tier),

    #[error("Invalid tier transition: {from} -> {to}")]
    InvalidTier {
        from: crate::compress::Tier,
        to: crate::compress::Tier,
    },

    #[error("Capability cache invalid: {0}")]
    CacheInvalid(CacheMissReason),

    #[error("Capability index stale: last sync {age_secs}s ago")]
    IndexStale { age_secs: u64 },

    #[error("No agent matched the task over the routing threshold")]
    NoAgent,

    #[error("Pipeline stage {stage} failed: {cause}")]
    PipelineStage { stage: usize, cause: String },

    #[error("Embedding provider error: {0}")]
    Embedding(String),

    #[error("Hook '{hook_id}' failed: {cause}")]
    Hook { hook_id: String, cause: String },

    #[error("Hook registry already initialized")]
    RegistryClosed,

    #[error("Request timed out")]
    Timeout,

    #[error("Server disconnected")]
    ServerDisconnected,

    #[error("Server not running")]
    ServerNotRunning,

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is recoverable (can retry with backoff)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Validation(_)
            | Error::DimensionMismatch { .. }
            | Error::NotFound(_)
            | Error::CodecNotTrained(_)
            | Error::InvalidTier { .. }
            | Error::NoAgent
            | Error::PipelineStage { .. }
            | Error::Hook { .. }
            | Error::RegistryClosed
            | Error::Rpc { .. }
            | Error::Serialization(_) => false,
            Error::CacheInvalid(_) | Error::IndexStale { .. } => false,
            Error::Embedding(_)
            | Error::Timeout
            | Error::ServerDisconnected
            | Error::ServerNotRunning
            | Error::Io(_) => true,
        }
    }

    /// Stable machine-readable code, carried in RPC error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) | Error::DimensionMismatch { .. } => "VALIDATION",
            Error::NotFound(_) => "NOT_FOUND",
            Error::CodecNotTrained(_) => "CODEC_NOT_TRAINED",
            Error::InvalidTier { .. } => "INVALID_TIER",
            Error::CacheInvalid(_) => "CACHE_MISS",
            Error::IndexStale { .. } => "INDEX_SYNC",
            Error::NoAgent => "NO_AGENT",
            Error::PipelineStage { .. } => "PIPELINE_STAGE",
            Error::Embedding(_) => "EMBEDDING",
            Error::Hook { .. } => "HOOK_FAILURE",
            Error::RegistryClosed => "REGISTRY_CLOSED",
            Error::Timeout => "TIMEOUT",
            Error::ServerDisconnected => "SERVER_DISCONNECTED",
            Error::ServerNotRunning => "SERVER_NOT_RUNNING",
            Error::Rpc { .. } => "RPC",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_recoverable() {
        assert!(Error::Timeout.is_recoverable());
        assert!(Error::ServerDisconnected.is_recoverable());
        assert!(Error::ServerNotRunning.is_recoverable());
        assert!(!Error::Validation("bad".into()).is_recoverable());
        assert!(!Error::NoAgent.is_recoverable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Timeout.code(), "TIMEOUT");
        assert_eq!(
            Error::CacheInvalid(CacheMissReason::MissingSentinel).code(),
            "CACHE_MISS"
        );
        assert_eq!(Error::NoAgent.code(), "NO_AGENT");
    }
}
