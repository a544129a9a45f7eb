//! The event handed to subscription handlers.

use crate::client::ConsumerRecord;
use logbus_core::{Event, EventError, Message, PARTITION_HEADER};
use std::collections::HashMap;

/// One delivered record, as seen by a handler.
///
/// Built fresh for every handler invocation. The header map always carries
/// `"partition"` set to the partition the record was read from, overriding any
/// wire header of the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    topic: String,
    message: Message,
    partition: i32,
    offset: i64,
    error: Option<EventError>,
}

impl Publication {
    /// Decode a consumer record.
    ///
    /// Wire headers are flattened into a map; a repeated key keeps its last
    /// value. Header values that are not UTF-8 are converted lossily and a
    /// missing payload becomes an empty body; both are reported through
    /// [`Event::error`].
    #[must_use]
    pub fn from_record(record: &ConsumerRecord) -> Self {
        let mut error = None;
        let mut header = HashMap::with_capacity(record.headers.len() + 1);

        for (key, value) in &record.headers {
            let value = match value {
                Some(bytes) => match std::str::from_utf8(bytes) {
                    Ok(text) => text.to_string(),
                    Err(_) => {
                        error.get_or_insert_with(|| EventError::InvalidHeader { key: key.clone() });
                        String::from_utf8_lossy(bytes).into_owned()
                    }
                },
                None => String::new(),
            };
            header.insert(key.clone(), value);
        }
        header.insert(PARTITION_HEADER.to_string(), record.partition.to_string());

        let body = if let Some(payload) = &record.payload {
            payload.clone()
        } else {
            error.get_or_insert(EventError::MissingPayload);
            Vec::new()
        };

        Self {
            topic: record.topic.clone(),
            message: Message { header, body },
            partition: record.partition,
            offset: record.offset,
            error,
        }
    }

    /// Partition the record was read from.
    #[must_use]
    pub const fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset of the record within its partition.
    #[must_use]
    pub const fn offset(&self) -> i64 {
        self.offset
    }
}

impl Event for Publication {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn message(&self) -> &Message {
        &self.message
    }

    fn error(&self) -> Option<&EventError> {
        self.error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_origin_partition() {
        let record = ConsumerRecord::new("orders", 2, 7, vec![0x01, 0x02]).with_header("trace", "abc");
        let publication = Publication::from_record(&record);

        assert_eq!(publication.topic(), "orders");
        assert_eq!(publication.message().header("partition"), Some("2"));
        assert_eq!(publication.message().header("trace"), Some("abc"));
        assert_eq!(publication.message().body, vec![0x01, 0x02]);
        assert_eq!(publication.offset(), 7);
        assert!(publication.error().is_none());
    }

    #[test]
    fn origin_partition_overrides_wire_header() {
        let record = ConsumerRecord::new("orders", 4, 0, vec![]).with_header("partition", "9");
        let publication = Publication::from_record(&record);

        assert_eq!(publication.message().header("partition"), Some("4"));
        assert_eq!(publication.message().partition(), Some(4));
    }

    #[test]
    fn repeated_header_keeps_last_value() {
        let record = ConsumerRecord::new("t", 0, 0, vec![])
            .with_header("k", "first")
            .with_header("k", "second");

        assert_eq!(Publication::from_record(&record).message().header("k"), Some("second"));
    }

    #[test]
    fn invalid_utf8_header_is_lossy_and_flagged() {
        let record = ConsumerRecord::new("t", 0, 0, vec![1]).with_header("bin", vec![0xff, b'a']);
        let publication = Publication::from_record(&record);

        assert_eq!(publication.message().header("bin"), Some("\u{fffd}a"));
        assert_eq!(
            publication.error(),
            Some(&EventError::InvalidHeader { key: "bin".to_string() })
        );
    }

    #[test]
    fn tombstone_has_empty_body() {
        let mut record = ConsumerRecord::new("t", 1, 3, vec![]);
        record.payload = None;
        let publication = Publication::from_record(&record);

        assert!(publication.message().body.is_empty());
        assert_eq!(publication.error(), Some(&EventError::MissingPayload));
    }

    #[test]
    fn null_header_value_becomes_empty_string() {
        let mut record = ConsumerRecord::new("t", 0, 0, vec![]);
        record.headers.push(("flag".to_string(), None));

        assert_eq!(Publication::from_record(&record).message().header("flag"), Some(""));
    }
}
