//! Errors raised by the engine's external collaborators.
//!
//! Each collaborator gets its own enum so callers can tell an unavailable
//! cache from an unavailable database. Payloads are plain strings so the
//! errors stay `Clone` and comparable in tests.

use thiserror::Error;

/// Result alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Result alias for durable store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from the fast cache store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The cache could not be reached or rejected the command.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// A cached value exists but cannot be decoded.
    #[error("Corrupt cache entry '{key}': {reason}")]
    Corrupt {
        /// Key holding the corrupt value
        key: String,
        /// What failed to decode
        reason: String,
    },

    /// A script returned a value outside its documented contract.
    #[error("Unexpected script reply: {0}")]
    UnexpectedReply(String),
}

/// Errors from the durable store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The database could not be reached or the statement failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The addressed row does not exist.
    #[error("Row not found: {0}")]
    NotFound(String),

    /// A constraint rejected the write.
    #[error("Constraint violated: {0}")]
    Constraint(String),
}

/// Errors from the message broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to declare a queue
    #[error("Declare failed for queue '{queue}': {reason}")]
    DeclareFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to publish a message
    #[error("Publish failed for queue '{queue}': {reason}")]
    PublishFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to attach a consumer
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// A delivered payload is not valid UTF-8 text
    #[error("Undecodable payload: {0}")]
    Undecodable(String),

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}
