//! Client abstraction layer.
//!
//! The broker never talks to rdkafka directly. It holds a consumer and a
//! producer through the [`ClientConsumer`] and [`ClientProducer`] capability
//! traits, each built by a zero-argument factory captured when the broker is
//! constructed and invoked afresh on every `connect()`. Production code uses
//! [`KafkaConsumer`](crate::KafkaConsumer) and
//! [`KafkaProducer`](crate::KafkaProducer); tests plug in doubles.
//!
//! # Dyn Compatibility
//!
//! Async methods return explicit `Pin<Box<dyn Future>>` values so clients can
//! be held as `Arc<dyn ClientConsumer>`.

use crate::error::ClientError;
use rdkafka::consumer::StreamConsumer;
use rdkafka::producer::FutureProducer;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by async client operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Builds a fresh consumer client.
pub type ConsumerFactory = Arc<dyn Fn() -> Result<Arc<dyn ClientConsumer>, ClientError> + Send + Sync>;

/// Builds a fresh producer client.
pub type ProducerFactory = Arc<dyn Fn() -> Result<Arc<dyn ClientProducer>, ClientError> + Send + Sync>;

/// A record read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    /// Topic the record belongs to
    pub topic: String,
    /// Partition the record was read from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Wire headers, in wire order; keys may repeat
    pub headers: Vec<(String, Option<Vec<u8>>)>,
    /// Payload; `None` for tombstones
    pub payload: Option<Vec<u8>>,
}

impl ConsumerRecord {
    /// Create a record with a payload and no headers.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            headers: Vec::new(),
            payload: Some(payload),
        }
    }

    /// Append a wire header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((key.into(), Some(value.into())));
        self
    }

    /// The position to commit once this record has been handled.
    #[must_use]
    pub fn next_position(&self) -> CommitPosition {
        CommitPosition {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset + 1,
        }
    }
}

/// A record to append to the log.
///
/// Only the partition is carried as routing metadata; message headers are not
/// forwarded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    /// Destination topic
    pub topic: String,
    /// Destination partition
    pub partition: i32,
    /// Payload
    pub payload: Vec<u8>,
}

/// Where a produced record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Partition written to
    pub partition: i32,
    /// Offset assigned by the backend
    pub offset: i64,
}

/// The next offset to read for one partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitPosition {
    /// Topic
    pub topic: String,
    /// Partition
    pub partition: i32,
    /// Next offset to read (last handled offset + 1)
    pub offset: i64,
}

/// Consumer capability over a partitioned log.
pub trait ClientConsumer: Send + Sync {
    /// Wait up to `timeout` for the next record.
    ///
    /// Returns `Ok(None)` when the wait elapses without a record.
    fn poll(&self, timeout: Duration) -> ClientFuture<'_, Option<ConsumerRecord>>;

    /// Replace the subscribed topic set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the subscription.
    fn subscribe(&self, topics: &[String]) -> Result<(), ClientError>;

    /// Drop every topic subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is closed.
    fn unsubscribe(&self) -> Result<(), ClientError>;

    /// Durably record read positions.
    ///
    /// An empty slice commits the consumer's current position for every
    /// assigned partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the commit.
    fn commit(&self, positions: &[CommitPosition]) -> Result<(), ClientError>;

    /// Stop fetching from `topics` without giving up their partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is closed or the backend rejects it.
    fn pause(&self, topics: &[String]) -> Result<(), ClientError>;

    /// Fetch from `topics` again after [`pause`](Self::pause).
    ///
    /// # Errors
    ///
    /// Returns an error if the client is closed or the backend rejects it.
    fn resume(&self, topics: &[String]) -> Result<(), ClientError>;

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the release fails.
    fn close(&self) -> Result<(), ClientError>;

    /// Raw access to the underlying rdkafka consumer, when there is one.
    fn connection(&self) -> Option<&StreamConsumer> {
        None
    }
}

/// Producer capability over a partitioned log.
pub trait ClientProducer: Send + Sync {
    /// Append one record.
    fn produce(&self, record: ProducerRecord) -> ClientFuture<'_, Delivery>;

    /// Flush pending records and release the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or release fails.
    fn close(&self) -> Result<(), ClientError>;

    /// Raw access to the underlying rdkafka producer, when there is one.
    fn connection(&self) -> Option<&FutureProducer> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_position_is_one_past_offset() {
        let record = ConsumerRecord::new("orders", 2, 41, vec![1]);
        assert_eq!(
            record.next_position(),
            CommitPosition {
                topic: "orders".to_string(),
                partition: 2,
                offset: 42,
            }
        );
    }

    #[test]
    fn with_header_keeps_wire_order() {
        let record = ConsumerRecord::new("t", 0, 0, vec![])
            .with_header("a", "1")
            .with_header("a", "2");
        assert_eq!(record.headers.len(), 2);
        assert_eq!(record.headers[1].1.as_deref(), Some(&b"2"[..]));
    }

    #[test]
    fn client_traits_are_dyn_compatible() {
        fn assert_consumer(_: Option<Arc<dyn ClientConsumer>>) {}
        fn assert_producer(_: Option<Arc<dyn ClientProducer>>) {}
        assert_consumer(None);
        assert_producer(None);
    }
}
