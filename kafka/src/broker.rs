//! The Kafka broker facade.

use crate::client::{ClientConsumer, ClientProducer, ConsumerFactory, ProducerFactory};
use crate::config::{BOOTSTRAP_SERVERS, KafkaConfig};
use crate::consumer::KafkaConsumer;
use crate::health::{HealthState, SubscriptionHealth};
use crate::producer::KafkaProducer;
use crate::publication::Publication;
use crate::publish::build_record;
use crate::subscriber::{DeadLetterTopic, KafkaSubscriber};
use crate::worker::{DeadLetterSink, SharedConsumer, Worker, WorkerRegistry};
use logbus_core::{
    Broker, BrokerError, BrokerFuture, BrokerOptions, Handler, Message, PublishOptions,
    SubscribeOptions, Subscriber,
};
use logbus_runtime::metrics::PublishMetrics;
use logbus_runtime::{DeadLetterQueue, RetryPolicy};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long one poll waits for a record.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Records buffered per subscription before its topic is paused.
pub const DEFAULT_INBOX_CAPACITY: usize = 16;

/// Default number of dead letters kept in memory.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;

/// Clients built by the last successful `connect`.
struct Connection {
    shared: Arc<SharedConsumer>,
    producer: Arc<dyn ClientProducer>,
}

/// [`Broker`] over a Kafka-compatible partitioned log.
///
/// # Lifecycle
///
/// The broker holds no clients until [`connect`](Broker::connect). Each
/// connect invokes the consumer and producer factories afresh, so options
/// changed through [`init`](Broker::init) take effect on the next connect.
///
/// # Delivery
///
/// - One consumer connection is shared by every subscription.
/// - Each subscription runs its own worker; records of one topic are handled
///   strictly in order.
/// - A record's offset is committed only after its handler succeeded.
/// - Failed handlers are retried per the [`RetryPolicy`], then the record is
///   dead-lettered and the worker moves on.
/// - A subscription buffers at most `inbox_capacity` polled records; beyond
///   that its topic is paused at the backend until the handler catches up.
///
/// # Example
///
/// ```no_run
/// use logbus_core::{Broker, BrokerOptions, Message, PublishOptions, SubscribeOptions, handler_fn};
/// use logbus_kafka::{KafkaBroker, KafkaConfig};
/// use logbus_runtime::metrics::MetricsServer;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut metrics = MetricsServer::new("0.0.0.0:9090".parse()?);
/// metrics.start()?;
///
/// let broker = KafkaBroker::new(BrokerOptions::new().with_extension(
///     KafkaConfig::new()
///         .set("bootstrap.servers", "localhost:9092")
///         .set("group.id", "billing"),
/// ));
/// broker.connect().await?;
///
/// let subscription = broker
///     .subscribe(
///         "orders",
///         handler_fn(|event| async move {
///             println!("{} bytes on partition {:?}", event.message().body.len(), event.message().header("partition"));
///             Ok(())
///         }),
///         SubscribeOptions::default(),
///     )
///     .await?;
///
/// let message = Message::new(b"order-17".to_vec()).with_header("partition", "2");
/// broker.publish("orders", &message, PublishOptions::default()).await?;
///
/// subscription.unsubscribe().await?;
/// broker.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaBroker {
    options: Arc<RwLock<BrokerOptions>>,
    consumer_factory: ConsumerFactory,
    producer_factory: ProducerFactory,
    connection: tokio::sync::RwLock<Option<Connection>>,
    workers: Arc<WorkerRegistry>,
    dead_letters: DeadLetterQueue<Publication>,
    retry_policy: RetryPolicy,
    poll_timeout: Duration,
    inbox_capacity: usize,
    dead_letter_topic: Option<String>,
}

impl KafkaBroker {
    /// Create a broker using the rdkafka-backed clients.
    #[must_use]
    pub fn new(options: BrokerOptions) -> Self {
        Self::builder().options(options).build()
    }

    /// Create a builder for configuring the broker.
    #[must_use]
    pub fn builder() -> KafkaBrokerBuilder {
        KafkaBrokerBuilder::default()
    }

    /// Whether `connect` has succeeded and `disconnect` has not been called since.
    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Number of running subscriptions.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.workers.len()
    }

    /// Health of every running subscription, ordered by topic.
    #[must_use]
    pub fn health(&self) -> Vec<SubscriptionHealth> {
        self.workers.health()
    }

    /// Records whose handler kept failing.
    ///
    /// The queue is shared with the workers; draining it removes entries for
    /// every holder.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue<Publication> {
        self.dead_letters.clone()
    }

    /// The default retry policy for new subscriptions.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Subscribe and return the concrete handle.
    ///
    /// Same as [`Broker::subscribe`], but keeps access to
    /// [`KafkaSubscriber::health`].
    ///
    /// Per-subscription overrides are read from `options.extensions`:
    /// a [`RetryPolicy`] and a [`DeadLetterTopic`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] before `connect`, or
    /// [`BrokerError::Subscription`] if the topic already has a subscription on
    /// this broker or the backend rejects it.
    pub async fn subscribe_topic(
        &self,
        topic: &str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> Result<KafkaSubscriber, BrokerError> {
        // Held until the worker is registered so a concurrent disconnect
        // cannot miss it.
        let guard = self.connection.read().await;
        let Some(connection) = guard.as_ref() else {
            return Err(BrokerError::NotConnected);
        };

        let id = self.workers.next_id();
        let (inbox_tx, inbox_rx) = tokio::sync::mpsc::channel(self.inbox_capacity);
        connection.shared.register(topic, id, inbox_tx).await.inspect_err(|e| {
            tracing::error!(topic = %topic, error = %e, "Subscription failed");
        })?;

        let retry_policy = options
            .extensions
            .get::<RetryPolicy>()
            .cloned()
            .unwrap_or_else(|| self.retry_policy.clone());
        let dead_letter_sink = options
            .extensions
            .get::<DeadLetterTopic>()
            .map(|dlt| dlt.0.clone())
            .or_else(|| self.dead_letter_topic.clone())
            .map(|topic| DeadLetterSink {
                topic,
                producer: Arc::clone(&connection.producer),
            });

        let health = Arc::new(HealthState::default());
        self.workers.spawn(
            id,
            Worker {
                topic: topic.to_string(),
                shared: Arc::clone(&connection.shared),
                inbox: inbox_rx,
                handler,
                retry_policy,
                poll_timeout: self.poll_timeout,
                dead_letters: self.dead_letters.clone(),
                dead_letter_sink,
                health: Arc::clone(&health),
                token: CancellationToken::new(),
            },
        );

        tracing::info!(topic = %topic, "Subscribed");

        Ok(KafkaSubscriber::new(
            id,
            topic.to_string(),
            options,
            Arc::clone(&connection.shared),
            Arc::clone(&self.workers),
            health,
        ))
    }

    /// Stop the workers of `connection` and close both of its clients.
    ///
    /// Returns the producer and consumer close errors, in that order.
    async fn release(&self, connection: Connection) -> (Option<String>, Option<String>) {
        self.workers.stop_attached(&connection.shared).await;
        connection.shared.clear();

        let producer = connection.producer.close().err().map(|e| {
            tracing::warn!(error = %e, "Failed to close producer");
            e.to_string()
        });
        let consumer = connection.shared.client().close().err().map(|e| {
            tracing::warn!(error = %e, "Failed to close consumer");
            e.to_string()
        });
        (producer, consumer)
    }

    /// Release a connection that is being replaced. Close errors are logged,
    /// not returned.
    async fn release_replaced(&self, connection: Connection) {
        let (producer, consumer) = self.release(connection).await;
        if producer.is_some() || consumer.is_some() {
            tracing::warn!(
                producer_error = ?producer,
                consumer_error = ?consumer,
                "Replaced connection released with errors"
            );
        }
    }
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("address", &self.address())
            .field("active_subscriptions", &self.active_subscriptions())
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

/// The rdkafka config derived from broker options.
///
/// Generic `addrs` fill in `bootstrap.servers` only when the backend config
/// names none.
fn kafka_config(options: &BrokerOptions) -> KafkaConfig {
    let config = options
        .extensions
        .get::<KafkaConfig>()
        .cloned()
        .unwrap_or_default();

    if config.bootstrap_servers().is_none() && !options.addrs.is_empty() {
        config.set(BOOTSTRAP_SERVERS, options.addrs.join(","))
    } else {
        config
    }
}

fn default_consumer_factory(options: Arc<RwLock<BrokerOptions>>) -> ConsumerFactory {
    Arc::new(move || {
        let config = kafka_config(&options.read().unwrap_or_else(PoisonError::into_inner));
        let consumer: Arc<dyn ClientConsumer> = Arc::new(KafkaConsumer::new(&config)?);
        Ok(consumer)
    })
}

fn default_producer_factory(options: Arc<RwLock<BrokerOptions>>) -> ProducerFactory {
    Arc::new(move || {
        let config = kafka_config(&options.read().unwrap_or_else(PoisonError::into_inner));
        let producer: Arc<dyn ClientProducer> = Arc::new(KafkaProducer::new(&config)?);
        Ok(producer)
    })
}

impl Broker for KafkaBroker {
    fn init(&self, options: BrokerOptions) -> Result<(), BrokerError> {
        if options.addrs.iter().any(|addr| addr.trim().is_empty()) {
            return Err(BrokerError::InvalidOption(
                "broker address must not be empty".to_string(),
            ));
        }

        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(&options);
        tracing::debug!(address = %self.address(), "Broker options updated");
        Ok(())
    }

    fn options(&self) -> BrokerOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn address(&self) -> String {
        let options = self.options.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(servers) = options
            .extensions
            .get::<KafkaConfig>()
            .and_then(KafkaConfig::bootstrap_servers)
        {
            return servers.to_string();
        }
        if options.addrs.is_empty() {
            "empty".to_string()
        } else {
            options.addrs.join(",")
        }
    }

    fn connect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            // Released outside the lock: a handler still running on an old
            // worker may call back into the broker.
            let previous = self.connection.write().await.take();
            if let Some(previous) = previous {
                tracing::debug!("Releasing previous connection before reconnecting");
                self.release_replaced(previous).await;
            }

            let consumer = (self.consumer_factory)().map_err(|e| {
                tracing::error!(error = %e, "Failed to create consumer");
                BrokerError::Connection(format!("Failed to create consumer: {e}"))
            })?;

            let producer = match (self.producer_factory)() {
                Ok(producer) => producer,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create producer");
                    if let Err(close_error) = consumer.close() {
                        tracing::warn!(error = %close_error, "Failed to close consumer");
                    }
                    return Err(BrokerError::Connection(format!(
                        "Failed to create producer: {e}"
                    )));
                }
            };

            let displaced = self.connection.write().await.replace(Connection {
                shared: Arc::new(SharedConsumer::new(consumer)),
                producer,
            });
            if let Some(displaced) = displaced {
                tracing::debug!("Releasing connection made by a concurrent connect");
                self.release_replaced(displaced).await;
            }

            tracing::info!(address = %self.address(), "Kafka broker connected");
            Ok(())
        })
    }

    fn disconnect(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let Some(connection) = self.connection.write().await.take() else {
                tracing::debug!("Disconnect called while not connected");
                return Ok(());
            };

            let (producer, consumer) = self.release(connection).await;
            if producer.is_some() || consumer.is_some() {
                return Err(BrokerError::Disconnect { producer, consumer });
            }

            tracing::info!("Kafka broker disconnected");
            Ok(())
        })
    }

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        message: &'a Message,
        _options: PublishOptions,
    ) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let producer = self
                .connection
                .read()
                .await
                .as_ref()
                .map(|connection| Arc::clone(&connection.producer))
                .ok_or(BrokerError::NotConnected)?;

            let record = build_record(topic, message);
            let partition = record.partition;

            match producer.produce(record).await {
                Ok(delivery) => {
                    PublishMetrics::record_publish(topic);
                    tracing::debug!(
                        topic = %topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Message published"
                    );
                    Ok(())
                }
                Err(e) => {
                    PublishMetrics::record_error(topic);
                    tracing::error!(
                        topic = %topic,
                        partition,
                        error = %e,
                        "Failed to publish message"
                    );
                    Err(BrokerError::Publish {
                        topic: topic.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> BrokerFuture<'a, Box<dyn Subscriber>> {
        Box::pin(async move {
            let subscriber = self.subscribe_topic(topic, handler, options).await?;
            Ok(Box::new(subscriber) as Box<dyn Subscriber>)
        })
    }

    fn name(&self) -> &'static str {
        "kafka"
    }
}

/// Builder for a [`KafkaBroker`].
///
/// # Example
///
/// ```
/// use logbus_core::BrokerOptions;
/// use logbus_kafka::KafkaBroker;
/// use logbus_runtime::RetryPolicy;
/// use std::time::Duration;
///
/// let broker = KafkaBroker::builder()
///     .options(BrokerOptions::new().with_addrs(["localhost:9092"]))
///     .retry_policy(RetryPolicy::builder().max_retries(5).build())
///     .poll_timeout(Duration::from_millis(250))
///     .dead_letter_topic("orders.dlq")
///     .build();
/// # let _ = broker;
/// ```
#[derive(Default)]
pub struct KafkaBrokerBuilder {
    options: Option<BrokerOptions>,
    consumer_factory: Option<ConsumerFactory>,
    producer_factory: Option<ProducerFactory>,
    retry_policy: Option<RetryPolicy>,
    poll_timeout: Option<Duration>,
    inbox_capacity: Option<usize>,
    dead_letter_topic: Option<String>,
    dead_letter_capacity: Option<usize>,
}

impl KafkaBrokerBuilder {
    /// Set the initial broker options.
    #[must_use]
    pub fn options(mut self, options: BrokerOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Replace the consumer factory.
    ///
    /// Default: builds a [`KafkaConsumer`] from the options current at
    /// connect time.
    #[must_use]
    pub fn consumer_factory(mut self, factory: ConsumerFactory) -> Self {
        self.consumer_factory = Some(factory);
        self
    }

    /// Replace the producer factory.
    ///
    /// Default: builds a [`KafkaProducer`] from the options current at
    /// connect time.
    #[must_use]
    pub fn producer_factory(mut self, factory: ProducerFactory) -> Self {
        self.producer_factory = Some(factory);
        self
    }

    /// Set the default handler retry policy.
    ///
    /// Default: [`RetryPolicy::default`]
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Set how long one poll waits for a record.
    ///
    /// Default: 100ms
    #[must_use]
    pub const fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Set how many polled records one subscription buffers before its
    /// topic is paused at the backend. Values below 1 are raised to 1.
    ///
    /// Default: 16
    #[must_use]
    pub const fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = Some(capacity);
        self
    }

    /// Republish exhausted records to `topic`, in addition to keeping them in
    /// the in-memory dead-letter queue.
    #[must_use]
    pub fn dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    /// Set how many dead letters are kept in memory.
    ///
    /// Default: 1000
    #[must_use]
    pub const fn dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = Some(capacity);
        self
    }

    /// Build the [`KafkaBroker`]. No client is created until `connect`.
    #[must_use]
    pub fn build(self) -> KafkaBroker {
        let options = Arc::new(RwLock::new(self.options.unwrap_or_default()));
        let consumer_factory = self
            .consumer_factory
            .unwrap_or_else(|| default_consumer_factory(Arc::clone(&options)));
        let producer_factory = self
            .producer_factory
            .unwrap_or_else(|| default_producer_factory(Arc::clone(&options)));

        KafkaBroker {
            options,
            consumer_factory,
            producer_factory,
            connection: tokio::sync::RwLock::new(None),
            workers: Arc::new(WorkerRegistry::default()),
            dead_letters: DeadLetterQueue::new(
                self.dead_letter_capacity.unwrap_or(DEFAULT_DEAD_LETTER_CAPACITY),
            ),
            retry_policy: self.retry_policy.unwrap_or_default(),
            poll_timeout: self.poll_timeout.unwrap_or(DEFAULT_POLL_TIMEOUT),
            inbox_capacity: self
                .inbox_capacity
                .unwrap_or(DEFAULT_INBOX_CAPACITY)
                .max(1),
            dead_letter_topic: self.dead_letter_topic,
        }
    }
}
