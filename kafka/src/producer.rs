//! rdkafka-backed producer client.

use crate::client::{ClientFuture, ClientProducer, Delivery, ProducerRecord};
use crate::config::KafkaConfig;
use crate::error::ClientError;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Default time to wait for a delivery report.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time `close` waits for in-flight records.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// [`ClientProducer`] over an rdkafka [`FutureProducer`].
pub struct KafkaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
    flush_timeout: Duration,
}

impl KafkaProducer {
    /// Create a producer from adapter config.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Kafka`] if librdkafka rejects the configuration.
    pub fn new(config: &KafkaConfig) -> Result<Self, ClientError> {
        Self::from_client_config(&config.producer_config())
    }

    /// Create a producer from a raw rdkafka config, used as-is.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Kafka`] if librdkafka rejects the configuration.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let producer: FutureProducer = config.create()?;

        tracing::info!(
            bootstrap_servers = config.get("bootstrap.servers").unwrap_or("empty"),
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        })
    }

    /// Set how long `produce` waits for a delivery report.
    #[must_use]
    pub const fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set how long `close` waits for in-flight records.
    #[must_use]
    pub const fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }
}

impl ClientProducer for KafkaProducer {
    fn produce(&self, record: ProducerRecord) -> ClientFuture<'_, Delivery> {
        Box::pin(async move {
            let future_record = FutureRecord::<(), Vec<u8>>::to(&record.topic)
                .payload(&record.payload)
                .partition(record.partition);

            match self
                .producer
                .send(future_record, Timeout::After(self.send_timeout))
                .await
            {
                Ok((partition, offset)) => Ok(Delivery { partition, offset }),
                Err((kafka_error, _)) => Err(ClientError::Kafka(kafka_error)),
            }
        })
    }

    fn close(&self) -> Result<(), ClientError> {
        self.producer.flush(Timeout::After(self.flush_timeout))?;
        tracing::debug!("Kafka producer flushed");
        Ok(())
    }

    fn connection(&self) -> Option<&FutureProducer> {
        Some(&self.producer)
    }
}
