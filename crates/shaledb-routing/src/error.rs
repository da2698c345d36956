//! Error types for the routing metadata layer.

/// Errors produced while constructing or validating routing value types.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// A namespace string or component violated the naming rules.
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    /// A tenant id string was not a 24-character hex value.
    #[error("invalid tenant id: {0}")]
    InvalidTenantId(String),

    /// A route key did not match the collection's shard key pattern.
    #[error("invalid shard key: {0}")]
    InvalidKey(String),

    /// A chunk range was empty or inverted.
    #[error("invalid chunk range: {0}")]
    InvalidChunkRange(String),
}
