//! Prometheus metrics for observability and monitoring.
//!
//! Consumer loops never surface steady-state failures to callers, so these
//! metrics (together with per-subscription health) are how an operator
//! notices a stalled or failing subscription.
//!
//! # Example
//!
//! ```rust,no_run
//! use logbus_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in adapters
pub use metrics::{counter, gauge, histogram};

/// Messages handed to the producer successfully.
pub const MESSAGES_PUBLISHED: &str = "logbus_messages_published_total";
/// Publish calls that returned an error.
pub const PUBLISH_ERRORS: &str = "logbus_publish_errors_total";
/// Records delivered to a handler.
pub const MESSAGES_CONSUMED: &str = "logbus_messages_consumed_total";
/// Successful commits.
pub const COMMITS: &str = "logbus_commits_total";
/// Failed commits.
pub const COMMIT_ERRORS: &str = "logbus_commit_errors_total";
/// Failed polls.
pub const POLL_ERRORS: &str = "logbus_poll_errors_total";
/// Handler invocations that returned an error.
pub const HANDLER_ERRORS: &str = "logbus_handler_errors_total";
/// Handler run time.
pub const HANDLER_DURATION: &str = "logbus_handler_duration_seconds";
/// Messages that exhausted their retries.
pub const DEAD_LETTERS: &str = "logbus_dead_letters_total";
/// Dead-letter entries evicted because the queue was full.
pub const DEAD_LETTERS_DROPPED: &str = "logbus_dead_letters_dropped_total";
/// Entries currently held by the dead-letter queue.
pub const DEAD_LETTER_QUEUE_SIZE: &str = "logbus_dead_letter_queue_size";
/// Running consumer loops.
pub const ACTIVE_SUBSCRIPTIONS: &str = "logbus_active_subscriptions";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics exporter.
///
/// Installs the global recorder and renders the scrape payload; serving it
/// over HTTP is left to the embedding application.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the embedding application serves `/metrics` on
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests) this logs a warning,
    /// leaves [`Self::handle`] empty and returns `Ok`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// The address the scrape endpoint is expected on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Publish side
    describe_counter!(MESSAGES_PUBLISHED, "Total number of messages published");
    describe_counter!(PUBLISH_ERRORS, "Total number of publish errors");

    // Consumer loop
    describe_counter!(
        MESSAGES_CONSUMED,
        "Total number of records delivered to handlers"
    );
    describe_counter!(COMMITS, "Total number of successful offset commits");
    describe_counter!(COMMIT_ERRORS, "Total number of failed offset commits");
    describe_counter!(POLL_ERRORS, "Total number of failed consumer polls");
    describe_counter!(
        HANDLER_ERRORS,
        "Total number of handler invocations that returned an error"
    );
    describe_histogram!(HANDLER_DURATION, "Time taken by a handler invocation");
    describe_gauge!(ACTIVE_SUBSCRIPTIONS, "Number of running consumer loops");

    // Dead letters
    describe_counter!(
        DEAD_LETTERS,
        "Total number of messages that exhausted their retries"
    );
    describe_counter!(
        DEAD_LETTERS_DROPPED,
        "Total number of dead-letter entries evicted at capacity"
    );
    describe_gauge!(
        DEAD_LETTER_QUEUE_SIZE,
        "Current number of entries in the dead-letter queue"
    );
}

/// Publish-side metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a successful publish.
    pub fn record_publish(topic: &str) {
        counter!(MESSAGES_PUBLISHED, "topic" => topic.to_string()).increment(1);
    }

    /// Record a failed publish.
    pub fn record_error(topic: &str) {
        counter!(PUBLISH_ERRORS, "topic" => topic.to_string()).increment(1);
    }
}

/// Consumer-loop metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a record handed to a handler.
    pub fn record_consume(topic: &str) {
        counter!(MESSAGES_CONSUMED, "topic" => topic.to_string()).increment(1);
    }

    /// Record a handler invocation's outcome and run time.
    pub fn record_handler(topic: &str, duration: Duration, failed: bool) {
        histogram!(HANDLER_DURATION, "topic" => topic.to_string()).record(duration.as_secs_f64());
        if failed {
            counter!(HANDLER_ERRORS, "topic" => topic.to_string()).increment(1);
        }
    }

    /// Record a commit attempt.
    pub fn record_commit(topic: &str, failed: bool) {
        if failed {
            counter!(COMMIT_ERRORS, "topic" => topic.to_string()).increment(1);
        } else {
            counter!(COMMITS, "topic" => topic.to_string()).increment(1);
        }
    }

    /// Record a failed poll.
    pub fn record_poll_error(topic: &str) {
        counter!(POLL_ERRORS, "topic" => topic.to_string()).increment(1);
    }

    /// Record a message moved to the dead-letter path.
    pub fn record_dead_letter(topic: &str) {
        counter!(DEAD_LETTERS, "topic" => topic.to_string()).increment(1);
    }

    /// Record a consumer loop starting.
    pub fn record_worker_started() {
        gauge!(ACTIVE_SUBSCRIPTIONS).increment(1.0);
    }

    /// Record a consumer loop exiting.
    pub fn record_worker_stopped() {
        gauge!(ACTIVE_SUBSCRIPTIONS).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if the address is invalid
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().expect("valid address");
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if the recorder cannot start
    fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().expect("valid address");
        let mut server = MetricsServer::new(addr);
        server.start().expect("recorder should install");

        PublishMetrics::record_publish("orders");
        ConsumerMetrics::record_consume("orders");
        ConsumerMetrics::record_commit("orders", false);
        ConsumerMetrics::record_handler("orders", Duration::from_millis(5), true);

        // If another test installed the recorder first, handle is None.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains(MESSAGES_PUBLISHED));
            assert!(rendered.contains(MESSAGES_CONSUMED));
            assert!(rendered.contains(COMMITS));
            assert!(rendered.contains(HANDLER_ERRORS));
        }
    }
}
