//! Mapping a [`Message`] onto a backend record.

use crate::client::ProducerRecord;
use logbus_core::Message;

/// Partition used when a message names none, or names an invalid one.
pub const DEFAULT_PARTITION: i32 = 0;

/// The partition a message is routed to.
///
/// Reads the `"partition"` header; an absent or unparsable value routes to
/// [`DEFAULT_PARTITION`].
#[must_use]
pub fn resolve_partition(message: &Message) -> i32 {
    message.partition().unwrap_or(DEFAULT_PARTITION)
}

/// Build the record to append for `message` on `topic`.
///
/// Only the partition header becomes routing metadata; other headers are not
/// carried on the wire.
#[must_use]
pub fn build_record(topic: &str, message: &Message) -> ProducerRecord {
    ProducerRecord {
        topic: topic.to_string(),
        partition: resolve_partition(message),
        payload: message.body.clone(),
    }
}
