//! # Logbus Runtime
//!
//! Delivery policy plumbing shared by Logbus adapters.
//!
//! ## Core Components
//!
//! - **Retry**: [`RetryPolicy`] and [`retry_with_backoff`] for re-invoking a failing
//!   handler with exponential backoff, stoppable by a shutdown signal
//! - **Dead letters**: [`DeadLetterQueue`] keeping messages whose retries ran out
//! - **Metrics**: metric names, descriptions and a Prometheus exporter

/// Retry logic with exponential backoff
pub mod retry;

/// Dead-letter queue for messages that exhausted their retries
pub mod dead_letter;

/// Prometheus metrics for observability
pub mod metrics;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use retry::{RetryOutcome, RetryPolicy, RetryPolicyBuilder, retry_with_backoff};
