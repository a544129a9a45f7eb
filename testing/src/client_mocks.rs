//! In-memory doubles for the Kafka client seam.
//!
//! Provides deterministic stand-ins for the rdkafka-backed clients:
//! - [`MockConsumer`]: scripted records and failures, recorded commits
//! - [`MockProducer`]: recorded records, optionally looped back into a consumer
//! - [`failing_consumer_factory`] / [`failing_producer_factory`]: connect failures
//!
//! Both doubles return the same error shapes as the real clients
//! ([`ClientError::Closed`] after close, for instance), so the broker's control
//! flow cannot tell them apart.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use logbus_kafka::{
    ClientConsumer, ClientError, ClientFuture, ClientProducer, CommitPosition, ConsumerFactory,
    ConsumerRecord, Delivery, ProducerFactory, ProducerRecord,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct ConsumerState {
    records: VecDeque<ConsumerRecord>,
    poll_errors: VecDeque<ClientError>,
    subscribe_error: Option<ClientError>,
    commit_error: Option<ClientError>,
    close_error: Option<ClientError>,
    topics: Vec<String>,
    paused: BTreeSet<String>,
    commits: Vec<Vec<CommitPosition>>,
    poll_calls: usize,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    close_calls: usize,
    factory_calls: usize,
    closed: bool,
}

/// Scripted consumer double.
///
/// Records are only handed out for topics the consumer is currently
/// subscribed to and has not paused, in the order they were pushed. An idle poll waits until a
/// record is pushed or the timeout elapses.
///
/// Clones share state, so a test keeps one handle for scripting and
/// assertions while the broker owns another.
///
/// # Example
///
/// ```
/// use logbus_kafka::{ClientConsumer, ConsumerRecord};
/// use logbus_testing::MockConsumer;
/// use std::time::Duration;
///
/// # async fn example() {
/// let consumer = MockConsumer::new();
/// consumer.push(ConsumerRecord::new("orders", 2, 0, vec![0x01, 0x02]));
///
/// consumer.subscribe(&["orders".to_string()]).unwrap();
/// let record = consumer.poll(Duration::from_millis(10)).await.unwrap();
/// assert_eq!(record.map(|r| r.partition), Some(2));
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockConsumer {
    state: Arc<Mutex<ConsumerState>>,
    arrivals: Arc<Notify>,
}

impl MockConsumer {
    /// Create an idle consumer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a record for delivery.
    pub fn push(&self, record: ConsumerRecord) {
        self.state.lock().unwrap().records.push_back(record);
        self.arrivals.notify_waiters();
    }

    /// Make the next poll fail with `error`. Queued errors are returned before
    /// any record.
    pub fn push_poll_error(&self, error: ClientError) {
        self.state.lock().unwrap().poll_errors.push_back(error);
        self.arrivals.notify_waiters();
    }

    /// Make every subscribe call fail with `error`.
    pub fn fail_subscribe(&self, error: ClientError) {
        self.state.lock().unwrap().subscribe_error = Some(error);
    }

    /// Make every commit call fail with `error`.
    pub fn fail_commit(&self, error: ClientError) {
        self.state.lock().unwrap().commit_error = Some(error);
    }

    /// Let commits succeed again.
    pub fn heal_commit(&self) {
        self.state.lock().unwrap().commit_error = None;
    }

    /// Make every close call fail with `error`.
    pub fn fail_close(&self, error: ClientError) {
        self.state.lock().unwrap().close_error = Some(error);
    }

    /// A factory handing out this consumer, reopened on every call.
    #[must_use]
    pub fn factory(&self) -> ConsumerFactory {
        let consumer = self.clone();
        Arc::new(move || {
            {
                let mut state = consumer.state.lock().unwrap();
                state.factory_calls += 1;
                state.closed = false;
            }
            let client: Arc<dyn ClientConsumer> = Arc::new(consumer.clone());
            Ok(client)
        })
    }

    /// Every committed position, flattened in commit order.
    #[must_use]
    pub fn commits(&self) -> Vec<CommitPosition> {
        self.state.lock().unwrap().commits.iter().flatten().cloned().collect()
    }

    /// Number of commit calls that succeeded.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state.lock().unwrap().commits.len()
    }

    /// Number of close calls, failed or not.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    /// Number of poll calls.
    #[must_use]
    pub fn poll_count(&self) -> usize {
        self.state.lock().unwrap().poll_calls
    }

    /// Number of subscribe calls, failed or not.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.state.lock().unwrap().subscribe_calls
    }

    /// Number of unsubscribe calls.
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.state.lock().unwrap().unsubscribe_calls
    }

    /// Number of times a factory built this consumer.
    #[must_use]
    pub fn factory_count(&self) -> usize {
        self.state.lock().unwrap().factory_calls
    }

    /// The current topic subscription.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.state.lock().unwrap().topics.clone()
    }

    /// Topics currently paused.
    #[must_use]
    pub fn paused_topics(&self) -> Vec<String> {
        self.state.lock().unwrap().paused.iter().cloned().collect()
    }

    /// Records not yet handed out.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    /// Whether the consumer is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn take_next(&self) -> Option<Result<Option<ConsumerRecord>, ClientError>> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Some(Err(ClientError::Closed));
        }
        if let Some(error) = state.poll_errors.pop_front() {
            return Some(Err(error));
        }
        let index = state
            .records
            .iter()
            .position(|record| {
                state.topics.contains(&record.topic) && !state.paused.contains(&record.topic)
            })?;
        Some(Ok(state.records.remove(index)))
    }
}

impl ClientConsumer for MockConsumer {
    fn poll(&self, timeout: Duration) -> ClientFuture<'_, Option<ConsumerRecord>> {
        Box::pin(async move {
            let arrived = self.arrivals.notified();
            self.state.lock().unwrap().poll_calls += 1;

            if let Some(result) = self.take_next() {
                return result;
            }

            tokio::select! {
                () = arrived => {}
                () = tokio::time::sleep(timeout) => {}
            }

            self.take_next().unwrap_or(Ok(None))
        })
    }

    fn subscribe(&self, topics: &[String]) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.subscribe_calls += 1;
        if state.closed {
            return Err(ClientError::Closed);
        }
        if let Some(error) = &state.subscribe_error {
            return Err(error.clone());
        }
        state.topics = topics.to_vec();
        state.paused.retain(|topic| topics.contains(topic));
        drop(state);
        self.arrivals.notify_waiters();
        Ok(())
    }

    fn unsubscribe(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.unsubscribe_calls += 1;
        if state.closed {
            return Err(ClientError::Closed);
        }
        state.topics.clear();
        state.paused.clear();
        Ok(())
    }

    fn commit(&self, positions: &[CommitPosition]) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ClientError::Closed);
        }
        if let Some(error) = &state.commit_error {
            return Err(error.clone());
        }
        state.commits.push(positions.to_vec());
        Ok(())
    }

    fn pause(&self, topics: &[String]) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ClientError::Closed);
        }
        state.paused.extend(topics.iter().cloned());
        Ok(())
    }

    fn resume(&self, topics: &[String]) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ClientError::Closed);
        }
        for topic in topics {
            state.paused.remove(topic);
        }
        drop(state);
        self.arrivals.notify_waiters();
        Ok(())
    }

    fn close(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.close_calls += 1;
        state.closed = true;
        state.topics.clear();
        state.paused.clear();
        state.close_error.clone().map_or(Ok(()), Err)
    }
}

#[derive(Default)]
struct ProducerState {
    produced: Vec<ProducerRecord>,
    produce_error: Option<ClientError>,
    close_error: Option<ClientError>,
    close_calls: usize,
    factory_calls: usize,
    next_offsets: HashMap<(String, i32), i64>,
    loopback: Option<MockConsumer>,
}

/// Recording producer double.
///
/// A producer built with [`linked`](Self::linked) also delivers every record
/// it accepts to a [`MockConsumer`], with offsets assigned per partition, so a
/// publish can be observed coming back through a subscription.
#[derive(Clone, Default)]
pub struct MockProducer {
    state: Arc<Mutex<ProducerState>>,
}

impl MockProducer {
    /// Create a producer that only records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a producer whose records are delivered to `consumer`.
    #[must_use]
    pub fn linked(consumer: &MockConsumer) -> Self {
        let producer = Self::default();
        producer.state.lock().unwrap().loopback = Some(consumer.clone());
        producer
    }

    /// Make every produce call fail with `error`.
    pub fn fail_produce(&self, error: ClientError) {
        self.state.lock().unwrap().produce_error = Some(error);
    }

    /// Make every close call fail with `error`.
    pub fn fail_close(&self, error: ClientError) {
        self.state.lock().unwrap().close_error = Some(error);
    }

    /// A factory handing out this producer.
    #[must_use]
    pub fn factory(&self) -> ProducerFactory {
        let producer = self.clone();
        Arc::new(move || {
            producer.state.lock().unwrap().factory_calls += 1;
            let client: Arc<dyn ClientProducer> = Arc::new(producer.clone());
            Ok(client)
        })
    }

    /// Every accepted record, in produce order.
    #[must_use]
    pub fn produced(&self) -> Vec<ProducerRecord> {
        self.state.lock().unwrap().produced.clone()
    }

    /// Number of close calls, failed or not.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    /// Number of times a factory built this producer.
    #[must_use]
    pub fn factory_count(&self) -> usize {
        self.state.lock().unwrap().factory_calls
    }
}

impl ClientProducer for MockProducer {
    fn produce(&self, record: ProducerRecord) -> ClientFuture<'_, Delivery> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(error) = &state.produce_error {
                return Err(error.clone());
            }

            let next = state
                .next_offsets
                .entry((record.topic.clone(), record.partition))
                .or_insert(0);
            let offset = *next;
            *next += 1;

            let delivery = Delivery {
                partition: record.partition,
                offset,
            };

            if let Some(consumer) = &state.loopback {
                consumer.push(ConsumerRecord::new(
                    record.topic.clone(),
                    record.partition,
                    offset,
                    record.payload.clone(),
                ));
            }
            state.produced.push(record);
            Ok(delivery)
        })
    }

    fn close(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.close_calls += 1;
        state.close_error.clone().map_or(Ok(()), Err)
    }
}

/// A consumer factory that always fails with `message`.
#[must_use]
pub fn failing_consumer_factory(message: &str) -> ConsumerFactory {
    let message = message.to_string();
    Arc::new(move || Err(ClientError::other(message.clone())))
}

/// A producer factory that always fails with `message`.
#[must_use]
pub fn failing_producer_factory(message: &str) -> ProducerFactory {
    let message = message.to_string();
    Arc::new(move || Err(ClientError::other(message.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumer_only_delivers_subscribed_topics() {
        let consumer = MockConsumer::new();
        consumer.push(ConsumerRecord::new("other", 0, 0, vec![]));
        consumer.push(ConsumerRecord::new("orders", 0, 0, vec![1]));
        consumer.subscribe(&["orders".to_string()]).unwrap();

        let record = consumer.poll(Duration::from_millis(5)).await.unwrap().unwrap();
        assert_eq!(record.topic, "orders");
        assert!(consumer.poll(Duration::from_millis(5)).await.unwrap().is_none());
        assert_eq!(consumer.pending(), 1);
    }

    #[tokio::test]
    async fn paused_topic_is_held_back_until_resumed() {
        let consumer = MockConsumer::new();
        consumer.push(ConsumerRecord::new("slow", 0, 0, vec![]));
        consumer.push(ConsumerRecord::new("busy", 0, 0, vec![]));
        consumer
            .subscribe(&["busy".to_string(), "slow".to_string()])
            .unwrap();
        consumer.pause(&["slow".to_string()]).unwrap();

        let record = consumer.poll(Duration::from_millis(5)).await.unwrap().unwrap();
        assert_eq!(record.topic, "busy");
        assert!(consumer.poll(Duration::from_millis(5)).await.unwrap().is_none());
        assert_eq!(consumer.paused_topics(), vec!["slow"]);

        consumer.resume(&["slow".to_string()]).unwrap();
        let record = consumer.poll(Duration::from_millis(5)).await.unwrap().unwrap();
        assert_eq!(record.topic, "slow");
        assert!(consumer.paused_topics().is_empty());
    }

    #[tokio::test]
    async fn closed_consumer_rejects_poll() {
        let consumer = MockConsumer::new();
        consumer.close().unwrap();
        assert!(matches!(
            consumer.poll(Duration::from_millis(5)).await,
            Err(ClientError::Closed)
        ));
        assert_eq!(consumer.close_count(), 1);
    }

    #[tokio::test]
    async fn linked_producer_assigns_offsets_per_partition() {
        let consumer = MockConsumer::new();
        let producer = MockProducer::linked(&consumer);

        for partition in [2, 2, 0] {
            producer
                .produce(ProducerRecord {
                    topic: "t".to_string(),
                    partition,
                    payload: vec![],
                })
                .await
                .unwrap();
        }

        consumer.subscribe(&["t".to_string()]).unwrap();
        let mut offsets = Vec::new();
        while let Some(record) = consumer.poll(Duration::from_millis(5)).await.unwrap() {
            offsets.push((record.partition, record.offset));
        }
        assert_eq!(offsets, vec![(2, 0), (2, 1), (0, 0)]);
    }

    #[test]
    fn failing_factories_return_other() {
        let Err(ClientError::Other(message)) = failing_producer_factory("boom")() else {
            panic!("expected failure");
        };
        assert_eq!(message, "boom");
        assert!(failing_consumer_factory("boom")().is_err());
    }
}
