//! # Logbus Testing
//!
//! Test doubles and helpers for exercising broker adapters without a live
//! cluster.
//!
//! This crate provides:
//! - [`MockConsumer`] and [`MockProducer`]: in-memory clients plugged in
//!   through the broker's factory seam
//! - [`RecordingHandler`]: a subscription handler that records and fails on
//!   demand
//! - [`helpers`]: waiting and tracing setup
//!
//! ## Example
//!
//! ```
//! use logbus_core::{Broker, SubscribeOptions};
//! use logbus_kafka::{ConsumerRecord, KafkaBroker};
//! use logbus_testing::{MockConsumer, MockProducer, RecordingHandler, helpers};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let consumer = MockConsumer::new();
//! let producer = MockProducer::new();
//! let broker = KafkaBroker::builder()
//!     .consumer_factory(consumer.factory())
//!     .producer_factory(producer.factory())
//!     .build();
//! broker.connect().await.unwrap();
//!
//! let recorder = RecordingHandler::new();
//! let _subscription = broker
//!     .subscribe("orders", recorder.handler(), SubscribeOptions::default())
//!     .await
//!     .unwrap();
//!
//! consumer.push(ConsumerRecord::new("orders", 2, 0, vec![0x01, 0x02]));
//! assert!(helpers::wait_until(Duration::from_secs(1), || consumer.commit_count() == 1).await);
//! # }
//! ```

mod client_mocks;
mod handlers;

pub use client_mocks::{
    MockConsumer, MockProducer, failing_consumer_factory, failing_producer_factory,
};
pub use handlers::{Invocation, RecordingHandler};

/// Test helpers and utilities.
pub mod helpers {
    use std::time::Duration;
    use tokio::time::{Instant, sleep};
    use tracing_subscriber::EnvFilter;

    /// Poll `condition` until it holds or `timeout` elapses.
    ///
    /// Returns whether the condition held.
    pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Install a test-friendly tracing subscriber.
    ///
    /// Honors `RUST_LOG` (default `warn`). Safe to call from every test; only
    /// the first call installs.
    pub fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}
