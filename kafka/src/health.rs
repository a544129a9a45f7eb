//! Per-subscription health counters.
//!
//! Consumer-loop failures never reach the caller of `subscribe`. They are
//! counted here so a stalled or permanently failing subscription is visible
//! through [`KafkaSubscriber::health`](crate::KafkaSubscriber::health) and
//! [`KafkaBroker::health`](crate::KafkaBroker::health).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Point-in-time view of one subscription's consumer loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionHealth {
    /// Subscribed topic
    pub topic: String,
    /// Records handed to the handler (once per record, not per attempt)
    pub delivered: u64,
    /// Successful commits
    pub committed: u64,
    /// Failed handler invocations, counting every attempt
    pub handler_failures: u64,
    /// Records given up on after the retry budget was spent
    pub dead_lettered: u64,
    /// Failed polls
    pub poll_errors: u64,
    /// Failed commits
    pub commit_errors: u64,
    /// Most recent loop error, if any
    pub last_error: Option<String>,
    /// Whether the worker is still running
    pub running: bool,
}

impl SubscriptionHealth {
    /// Records whose handler succeeded but whose commit failed or is pending.
    #[must_use]
    pub const fn uncommitted(&self) -> u64 {
        self.delivered
            .saturating_sub(self.committed)
            .saturating_sub(self.dead_lettered)
    }
}

#[derive(Debug, Default)]
pub(crate) struct HealthState {
    delivered: AtomicU64,
    committed: AtomicU64,
    handler_failures: AtomicU64,
    dead_lettered: AtomicU64,
    poll_errors: AtomicU64,
    commit_errors: AtomicU64,
    running: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl HealthState {
    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self, error: &str) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(error);
    }

    pub(crate) fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poll_error(&self, error: &str) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(error);
    }

    pub(crate) fn record_commit_error(&self, error: &str) {
        self.commit_errors.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(error);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    fn set_last_error(&self, error: &str) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    pub(crate) fn snapshot(&self, topic: &str) -> SubscriptionHealth {
        SubscriptionHealth {
            topic: topic.to_string(),
            delivered: self.delivered.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            commit_errors: self.commit_errors.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            running: self.running.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let state = HealthState::default();
        state.set_running(true);
        state.record_delivered();
        state.record_delivered();
        state.record_committed();
        state.record_poll_error("broker down");
        state.record_handler_failure("bad payload");

        let health = state.snapshot("orders");
        assert_eq!(health.topic, "orders");
        assert_eq!(health.delivered, 2);
        assert_eq!(health.committed, 1);
        assert_eq!(health.poll_errors, 1);
        assert_eq!(health.handler_failures, 1);
        assert_eq!(health.last_error.as_deref(), Some("bad payload"));
        assert!(health.running);
        assert_eq!(health.uncommitted(), 1);
    }
}
