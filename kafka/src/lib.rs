//! Kafka adapter for the logbus broker contract.
//!
//! This crate implements [`logbus_core::Broker`] on top of a Kafka-compatible
//! partitioned log (Apache Kafka, Redpanda, ...) through rdkafka.
//!
//! # Delivery Guarantees
//!
//! **At-least-once delivery** with manual offset commits:
//! - A record is committed only AFTER its handler returned `Ok`
//! - Failed handlers are retried with exponential backoff, then the record is
//!   dead-lettered and left uncommitted
//! - If the process crashes before commit, the record will be redelivered
//! - Handlers must therefore be idempotent
//!
//! # Partitions
//!
//! The `"partition"` header picks the partition a published message is written
//! to (absent or invalid means partition 0). Every delivered message carries
//! `"partition"` set to the partition it was read from, so the header
//! round-trips. No other header is forwarded on the wire.
//!
//! # Testing Without a Cluster
//!
//! The broker never builds rdkafka clients directly. It calls a
//! [`ConsumerFactory`] and a [`ProducerFactory`] on every `connect`, and talks
//! to the results through the [`ClientConsumer`] and [`ClientProducer`]
//! traits. Swap the factories through [`KafkaBroker::builder`] to run the same
//! publish and consume paths against in-memory doubles.
//!
//! # Example
//!
//! ```no_run
//! use logbus_core::{Broker, BrokerOptions, Message, PublishOptions};
//! use logbus_kafka::{KafkaBroker, KafkaSettings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = KafkaBroker::new(
//!     BrokerOptions::new().with_extension(KafkaSettings::from_env().into_config()),
//! );
//! broker.connect().await?;
//!
//! let message = Message::new(b"hello".to_vec()).with_header("partition", "3");
//! broker.publish("greetings", &message, PublishOptions::default()).await?;
//!
//! broker.disconnect().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod broker;
pub mod client;
pub mod config;
mod consumer;
mod error;
mod health;
mod producer;
mod publication;
pub mod publish;
mod subscriber;
mod worker;

pub use broker::{
    DEFAULT_DEAD_LETTER_CAPACITY, DEFAULT_INBOX_CAPACITY, DEFAULT_POLL_TIMEOUT, KafkaBroker,
    KafkaBrokerBuilder,
};
pub use client::{
    ClientConsumer, ClientFuture, ClientProducer, CommitPosition, ConsumerFactory, ConsumerRecord,
    Delivery, ProducerFactory, ProducerRecord,
};
pub use config::{KafkaConfig, KafkaSettings};
pub use consumer::KafkaConsumer;
pub use error::ClientError;
pub use health::SubscriptionHealth;
pub use producer::{DEFAULT_FLUSH_TIMEOUT, DEFAULT_SEND_TIMEOUT, KafkaProducer};
pub use publication::Publication;
pub use subscriber::{DeadLetterTopic, KafkaSubscriber};
