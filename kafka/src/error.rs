//! Errors at the client seam.

use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors returned by [`ClientConsumer`](crate::ClientConsumer) and
/// [`ClientProducer`](crate::ClientProducer) implementations.
///
/// Test doubles return the same shapes as the rdkafka-backed clients so the
/// broker's control flow cannot tell them apart.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The underlying Kafka client reported an error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// The client was closed and can no longer be used
    #[error("Client is closed")]
    Closed,

    /// The operation did not complete in time
    #[error("Operation timed out")]
    Timeout,

    /// Any other failure
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Shorthand for [`ClientError::Other`].
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
