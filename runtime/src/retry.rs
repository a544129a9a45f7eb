//! Retry logic with exponential backoff for failing message handlers.
//!
//! A delivery whose handler fails is retried according to a [`RetryPolicy`].
//! When the retries run out the caller gets the last error back and decides
//! where the message goes next (usually a dead-letter queue). Backoff sleeps
//! are interrupted by a shutdown future so an unsubscribed worker does not
//! linger.
//!
//! # Example
//!
//! ```rust
//! use logbus_runtime::retry::{RetryOutcome, RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let outcome = retry_with_backoff(
//!     &policy,
//!     |_attempt| async { Ok::<_, String>(42) },
//!     std::future::pending(),
//! )
//! .await;
//!
//! assert!(matches!(outcome, RetryOutcome::Succeeded { value: 42, attempts: 1 }));
//! # }
//! ```

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: 0.0 (no randomization)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first failure
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the computed delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: None,
        }
    }

    /// A policy that never retries: the first failure is final.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given retry number (0-based).
    ///
    /// Uses exponential backoff: `initial_delay * multiplier^attempt`, capped at
    /// `max_delay`. Jitter is not applied here; see [`Self::jittered_delay`].
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_possible_wrap,
            clippy::cast_sign_loss
        )]
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.min(i32::MAX as usize) as i32);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);

        delay.min(self.max_delay)
    }

    /// [`Self::delay_for_attempt`] plus a random extra of up to `jitter` of it.
    #[must_use]
    pub fn jittered_delay(&self, attempt: usize) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }

        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay.mul_f64(1.0 + extra).min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Set the jitter fraction (`0.1` adds up to 10% to each delay).
    #[must_use]
    pub const fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
            jitter: self.jitter.unwrap_or(defaults.jitter).max(0.0),
        }
    }
}

/// Result of [`retry_with_backoff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded
    Succeeded {
        /// The successful result
        value: T,
        /// Number of invocations, including the successful one
        attempts: usize,
    },
    /// Every attempt failed and the retry budget is spent
    Exhausted {
        /// Error from the last attempt
        error: E,
        /// Number of invocations (`max_retries + 1`)
        attempts: usize,
    },
    /// Shutdown fired while waiting to retry
    Cancelled {
        /// Error from the last attempt
        error: E,
        /// Number of invocations before shutdown
        attempts: usize,
    },
}

/// Run an async operation, retrying failures with exponential backoff.
///
/// `operation` receives the 0-based attempt number. A running attempt is never
/// interrupted; `shutdown` is only observed while sleeping between attempts.
///
/// # Example
///
/// ```rust
/// use logbus_runtime::retry::{RetryOutcome, RetryPolicy, retry_with_backoff};
/// use std::time::Duration;
///
/// # async fn example() {
/// let policy = RetryPolicy::builder()
///     .max_retries(1)
///     .initial_delay(Duration::from_millis(1))
///     .build();
///
/// let outcome = retry_with_backoff(
///     &policy,
///     |_attempt| async { Err::<(), _>("still broken") },
///     std::future::pending(),
/// )
/// .await;
///
/// assert_eq!(outcome, RetryOutcome::Exhausted { error: "still broken", attempts: 2 });
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E, S>(
    policy: &RetryPolicy,
    mut operation: F,
    shutdown: S,
) -> RetryOutcome<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt + 1,
                };
            }
            Err(error) => {
                if attempt >= policy.max_retries {
                    tracing::error!(
                        attempt,
                        error = %error,
                        "Operation failed after max retries"
                    );
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt + 1,
                    };
                }

                let delay = policy.jittered_delay(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "Operation failed, retrying..."
                );

                tokio::select! {
                    biased;
                    () = &mut shutdown => {
                        tracing::debug!(attempt, "Retry interrupted by shutdown");
                        return RetryOutcome::Cancelled {
                            error,
                            attempts: attempt + 1,
                        };
                    }
                    () = sleep(delay) => {}
                }

                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retry_policy_delay_calculation() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_policy_max_delay_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(10_000), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .jitter(0.5)
            .build();

        for _ in 0..100 {
            let delay = policy.jittered_delay(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_first_try() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let outcome = retry_with_backoff(
            &policy,
            |_| {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(42)
                }
            },
            std::future::pending(),
        )
        .await;

        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                value: 42,
                attempts: 1
            }
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(10))
            .build();

        let outcome = retry_with_backoff(
            &policy,
            |attempt| async move {
                if attempt < 2 {
                    Err(format!("Attempt {attempt} failed"))
                } else {
                    Ok(42)
                }
            },
            std::future::pending(),
        )
        .await;

        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                value: 42,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(10))
            .build();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let outcome = retry_with_backoff(
            &policy,
            |_| {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("Persistent failure")
                }
            },
            std::future::pending(),
        )
        .await;

        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                error: "Persistent failure",
                attempts: 3
            }
        );
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[tokio::test]
    async fn test_no_retry_policy_fails_once() {
        let outcome = retry_with_backoff(
            &RetryPolicy::no_retry(),
            |_| async { Err::<(), _>("nope") },
            std::future::pending(),
        )
        .await;

        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                error: "nope",
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let policy = RetryPolicy::builder()
            .max_retries(10)
            .initial_delay(Duration::from_secs(60))
            .build();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            retry_with_backoff(
                &policy,
                |_| async { Err::<(), _>("down") },
                std::future::ready(()),
            ),
        )
        .await;

        assert_eq!(
            outcome,
            Ok(RetryOutcome::Cancelled {
                error: "down",
                attempts: 1
            })
        );
    }
}
