//! Error types shared by every broker adapter.

use thiserror::Error;

/// Errors returned synchronously by [`Broker`](crate::Broker) and
/// [`Subscriber`](crate::Subscriber) operations.
///
/// Only connect-time, publish-time and subscribe-time failures surface here.
/// Conditions inside a running consumer loop (poll failures, handler failures,
/// commit failures) are reported through logs, metrics and subscription health
/// instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Operation requires a connection but `connect` has not succeeded
    #[error("Broker is not connected")]
    NotConnected,

    /// Building a backend client failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Backend rejected the topic registration
    #[error("Subscription failed for topic '{topic}': {reason}")]
    Subscription {
        /// The topic that could not be registered
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Backend rejected or failed to deliver a published message
    #[error("Publish failed for topic '{topic}': {reason}")]
    Publish {
        /// The destination topic
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Unregistering a topic from the backend failed
    #[error("Unsubscribe failed for topic '{topic}': {reason}")]
    Unsubscribe {
        /// The topic being unregistered
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// One or both clients failed to release during disconnect
    #[error("Disconnect failed (producer: {producer:?}, consumer: {consumer:?})")]
    Disconnect {
        /// Producer release error, if any
        producer: Option<String>,
        /// Consumer release error, if any
        consumer: Option<String>,
    },

    /// An option value could not be applied
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

/// Error returned by a subscription handler.
///
/// A handler error never reaches the caller of `subscribe`; it prevents the
/// delivery from being committed and drives the retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Create a handler error from any message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Problems detected while decoding a delivered record into an event.
///
/// The event is still delivered; the handler decides what to do with it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Record carried no payload (for example a tombstone)
    #[error("Record has no payload")]
    MissingPayload,

    /// A header value was not valid UTF-8 and was converted lossily
    #[error("Header '{key}' is not valid UTF-8")]
    InvalidHeader {
        /// The offending header key
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_conversions() {
        assert_eq!(HandlerError::from("boom").message(), "boom");
        assert_eq!(HandlerError::from("boom".to_string()), HandlerError::new("boom"));
    }

    #[test]
    fn disconnect_error_reports_both_sides() {
        let err = BrokerError::Disconnect {
            producer: Some("flush timed out".to_string()),
            consumer: Some("already closed".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("flush timed out"));
        assert!(text.contains("already closed"));
    }
}
