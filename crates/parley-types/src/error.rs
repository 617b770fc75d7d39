use thiserror::Error;

/// Errors from key-value store operations (used by the `KvStore` trait in parley-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from the coordination primitives (mutex, claim guard).
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("lock on '{resource}' expired before it was released")]
    LockLost { resource: String },
}

/// Errors from an LLM provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("rate limited")]
    RateLimited,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Errors from sending a message to the chat platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("failed to send message: {0}")]
    Send(String),

    #[error("platform connection closed")]
    Closed,
}

/// Errors raised while answering one inbound event.
///
/// Caught at the handler boundary, logged, and replaced by a generic reply.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}
