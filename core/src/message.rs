//! The broker-agnostic message type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header key carrying the target (publish) or origin (delivery) partition.
///
/// On publish the value is read as a non-negative 32-bit decimal; anything
/// else routes to partition 0. On delivery adapters always set it to the
/// partition the record was read from.
pub const PARTITION_HEADER: &str = "partition";

/// A message: string headers plus an opaque body.
///
/// # Example
///
/// ```
/// use logbus_core::Message;
///
/// let message = Message::new(b"hello".to_vec()).with_header("partition", "3");
/// assert_eq!(message.partition(), Some(3));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Header entries; keys are unique
    pub header: HashMap<String, String>,
    /// Raw payload
    pub body: Vec<u8>,
}

impl Message {
    /// Create a message with the given body and no headers.
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            header: HashMap::new(),
            body: body.into(),
        }
    }

    /// Add a header entry, replacing any previous value for the key.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.header.get(key).map(String::as_str)
    }

    /// The partition named by the [`PARTITION_HEADER`] entry.
    ///
    /// Returns `None` when the header is absent, not a decimal integer, negative,
    /// or larger than `i32::MAX`.
    #[must_use]
    pub fn partition(&self) -> Option<i32> {
        self.header(PARTITION_HEADER)
            .and_then(|value| value.parse::<i32>().ok())
            .filter(|partition| *partition >= 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn partition_absent() {
        assert_eq!(Message::new(vec![]).partition(), None);
    }

    #[test]
    fn partition_rejects_garbage() {
        for value in ["", "abc", "-1", "2147483648", " 3", "3.0"] {
            let message = Message::new(vec![]).with_header(PARTITION_HEADER, value);
            assert_eq!(message.partition(), None, "value {value:?}");
        }
    }

    #[test]
    fn with_header_replaces() {
        let message = Message::new(vec![])
            .with_header("k", "a")
            .with_header("k", "b");
        assert_eq!(message.header("k"), Some("b"));
        assert_eq!(message.header.len(), 1);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn serializes_as_json() {
        let message = Message::new(vec![1, 2]).with_header("partition", "1");
        let json = serde_json::to_string(&message).expect("serialization should succeed");
        let back: Message = serde_json::from_str(&json).expect("deserialization should succeed");
        assert_eq!(back, message);
    }

    proptest! {
        #[test]
        fn partition_parses_every_non_negative_i32(partition in 0..=i32::MAX) {
            let message = Message::new(vec![]).with_header(PARTITION_HEADER, partition.to_string());
            prop_assert_eq!(message.partition(), Some(partition));
        }
    }
}
