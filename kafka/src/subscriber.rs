//! Subscription handles.

use crate::health::{HealthState, SubscriptionHealth};
use crate::worker::{SharedConsumer, WorkerRegistry};
use logbus_core::{BrokerError, BrokerFuture, SubscribeOptions, Subscriber};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Subscribe option naming a topic that exhausted records are republished to.
///
/// ```
/// use logbus_core::SubscribeOptions;
/// use logbus_kafka::DeadLetterTopic;
///
/// let options = SubscribeOptions::default().with_extension(DeadLetterTopic::new("orders.dlq"));
/// # let _ = options;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTopic(pub String);

impl DeadLetterTopic {
    /// Create a dead-letter topic option.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }
}

/// An active subscription on a [`KafkaBroker`](crate::KafkaBroker).
///
/// Dropping the handle does not stop the worker; call
/// [`unsubscribe`](Subscriber::unsubscribe) or disconnect the broker.
pub struct KafkaSubscriber {
    id: u64,
    topic: String,
    options: SubscribeOptions,
    shared: Arc<SharedConsumer>,
    workers: Arc<WorkerRegistry>,
    health: Arc<HealthState>,
    unsubscribed: AtomicBool,
}

impl KafkaSubscriber {
    pub(crate) fn new(
        id: u64,
        topic: String,
        options: SubscribeOptions,
        shared: Arc<SharedConsumer>,
        workers: Arc<WorkerRegistry>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            id,
            topic,
            options,
            shared,
            workers,
            health,
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// Current health of this subscription's consumer loop.
    #[must_use]
    pub fn health(&self) -> SubscriptionHealth {
        self.health.snapshot(&self.topic)
    }

    /// Whether [`unsubscribe`](Subscriber::unsubscribe) has been called.
    #[must_use]
    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for KafkaSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSubscriber")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("unsubscribed", &self.is_unsubscribed())
            .finish_non_exhaustive()
    }
}

impl Subscriber for KafkaSubscriber {
    fn options(&self) -> &SubscribeOptions {
        &self.options
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn unsubscribe(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            if self.unsubscribed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }

            let result = self.shared.unregister(&self.topic, self.id).await;
            self.workers.stop(self.id).await;

            tracing::info!(topic = %self.topic, "Unsubscribed");

            result.map_err(|e| BrokerError::Unsubscribe {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })
        })
    }
}
