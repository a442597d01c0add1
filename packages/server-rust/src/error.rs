//! Typed errors surfaced by the engine.
//!
//! Collaborator traits ([`HotStore`](crate::storage::HotStore),
//! [`DurableStore`](crate::storage::DurableStore), flush writers) return
//! `anyhow::Result`; the engine wraps those failures in the types below.

/// Misuse detected while building the engine or one of its components.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("stream `{stream}`: size threshold must be at least 1")]
    ZeroThreshold { stream: String },
    #[error("stream `{stream}`: flush delay must be greater than zero")]
    ZeroFlushDelay { stream: String },
    #[error("stream `{0}` is configured more than once")]
    DuplicateStream(String),
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("no tokio runtime is available; construct inside a runtime context")]
    NoRuntime,
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A flush whose durable write failed. The snapshot has already been merged
/// back into the live buffer when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("flush of stream `{stream}` failed; {requeued} operations re-buffered")]
    WriteFailed {
        stream: String,
        requeued: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors from the process-wide coordinator.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown stream: {0}")]
    UnknownStream(String),
    #[error("stream `{0}` is registered with different key/value types")]
    StreamTypeMismatch(String),
    #[error("stream `{0}` is already registered")]
    DuplicateStream(String),
    #[error("engine is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{} stream(s) failed to drain on shutdown", .0.len())]
    DrainFailed(Vec<BatchError>),
}
