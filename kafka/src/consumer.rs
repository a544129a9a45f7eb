//! rdkafka-backed consumer client.

use crate::client::{ClientConsumer, ClientFuture, CommitPosition, ConsumerRecord};
use crate::config::KafkaConfig;
use crate::error::ClientError;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// [`ClientConsumer`] over an rdkafka [`StreamConsumer`].
///
/// Offsets are committed manually (`enable.auto.commit=false`) so a record is
/// only marked as read after its handler succeeded.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    closed: AtomicBool,
}

impl KafkaConsumer {
    /// Create a consumer from adapter config.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Kafka`] if librdkafka rejects the configuration.
    pub fn new(config: &KafkaConfig) -> Result<Self, ClientError> {
        Self::from_client_config(&config.consumer_config())
    }

    /// Create a consumer from a raw rdkafka config, used as-is.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Kafka`] if librdkafka rejects the configuration.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let consumer: StreamConsumer = config.create()?;

        tracing::info!(
            bootstrap_servers = config.get("bootstrap.servers").unwrap_or("empty"),
            group_id = config.get("group.id").unwrap_or(""),
            "Kafka consumer created"
        );

        Ok(Self {
            consumer,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    /// The currently assigned partitions of `topics`.
    fn assigned(&self, topics: &[String]) -> Result<TopicPartitionList, ClientError> {
        let mut list = TopicPartitionList::new();
        for element in self.consumer.assignment()?.elements() {
            if topics.iter().any(|topic| topic == element.topic()) {
                list.add_partition(element.topic(), element.partition());
            }
        }
        Ok(list)
    }
}

/// Copy a borrowed rdkafka message into an owned record.
fn to_record<M: Message>(message: &M) -> ConsumerRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| (header.key.to_string(), header.value.map(<[u8]>::to_vec)))
                .collect()
        })
        .unwrap_or_default();

    ConsumerRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        headers,
        payload: message.payload().map(<[u8]>::to_vec),
    }
}

impl ClientConsumer for KafkaConsumer {
    fn poll(&self, timeout: Duration) -> ClientFuture<'_, Option<ConsumerRecord>> {
        Box::pin(async move {
            self.ensure_open()?;

            match tokio::time::timeout(timeout, self.consumer.recv()).await {
                Err(_elapsed) => Ok(None),
                Ok(Ok(message)) => Ok(Some(to_record(&message))),
                Ok(Err(e)) => Err(ClientError::Kafka(e)),
            }
        })
    }

    fn subscribe(&self, topics: &[String]) -> Result<(), ClientError> {
        self.ensure_open()?;
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topic_refs)?;
        Ok(())
    }

    fn unsubscribe(&self) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.consumer.unsubscribe();
        Ok(())
    }

    fn commit(&self, positions: &[CommitPosition]) -> Result<(), ClientError> {
        self.ensure_open()?;

        if positions.is_empty() {
            self.consumer.commit_consumer_state(CommitMode::Async)?;
            return Ok(());
        }

        let mut list = TopicPartitionList::new();
        for position in positions {
            list.add_partition_offset(
                &position.topic,
                position.partition,
                Offset::Offset(position.offset),
            )?;
        }
        self.consumer.commit(&list, CommitMode::Async)?;
        Ok(())
    }

    fn pause(&self, topics: &[String]) -> Result<(), ClientError> {
        self.ensure_open()?;
        let partitions = self.assigned(topics)?;
        if partitions.count() > 0 {
            self.consumer.pause(&partitions)?;
        }
        Ok(())
    }

    fn resume(&self, topics: &[String]) -> Result<(), ClientError> {
        self.ensure_open()?;
        let partitions = self.assigned(topics)?;
        if partitions.count() > 0 {
            self.consumer.resume(&partitions)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // The connection itself is torn down when the last handle drops.
        self.consumer.unsubscribe();
        tracing::debug!("Kafka consumer closed");
        Ok(())
    }

    fn connection(&self) -> Option<&StreamConsumer> {
        Some(&self.consumer)
    }
}
