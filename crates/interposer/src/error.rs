use posuer_config::CapabilityType;
use thiserror::Error;

/// Errors raised by the interposer core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to initialize backend '{name}': {reason}")]
    InitializationFailed { name: String, reason: String },

    #[error("backend not found: {0}")]
    BackendNotFound(String),

    #[error("invalid backend name '{0}': must not contain '-', '.', or '+'")]
    InvalidBackendName(String),

    #[error("failed to list {kind} from '{backend}': {reason}")]
    EnumerationFailed {
        backend: String,
        kind: CapabilityType,
        reason: String,
    },

    /// A forwarded request failed; surfaced to the upstream caller verbatim.
    #[error("{0}")]
    Rpc(String),

    #[error(transparent)]
    Isolate(#[from] posuer_isolate::IsolateError),

    #[error(transparent)]
    Config(#[from] posuer_config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
