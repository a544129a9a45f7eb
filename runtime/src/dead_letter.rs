//! Dead-letter queue for messages whose handler kept failing.
//!
//! When the retry budget for a delivery is spent the consumer loop moves on to
//! the next message and parks the failed one here, so it stays inspectable
//! instead of being retried forever or silently lost.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Dead letter queue entry.
///
/// Represents a message that exhausted its retries, with metadata about the
/// failure.
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The failed message
    pub payload: T,

    /// Number of handler invocations made before giving up
    pub attempts: usize,

    /// The error message from the last failure
    pub error_message: String,

    /// When the entry was parked
    pub dead_lettered_at: DateTime<Utc>,
}

/// Bounded dead letter queue.
///
/// # Features
///
/// - Bounded with configurable max size
/// - FIFO ordering (oldest entries dropped when full)
/// - Thread-safe; clones share the same storage
/// - Metrics for queue size and operations
///
/// # Example
///
/// ```
/// use logbus_runtime::DeadLetterQueue;
///
/// let dlq = DeadLetterQueue::new(1000);
/// dlq.push("order-17".to_string(), "handler timed out".to_string(), 4);
/// assert_eq!(dlq.len(), 1);
///
/// for entry in dlq.drain() {
///     println!("{} failed {} times: {}", entry.payload, entry.attempts, entry.error_message);
/// }
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create a new dead letter queue holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
        }
    }

    /// Park a failed message.
    ///
    /// If the queue is full, the oldest entry is dropped.
    pub fn push(&self, payload: T, error_message: String, attempts: usize) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if self.max_size == 0 {
            metrics::counter!(crate::metrics::DEAD_LETTERS_DROPPED).increment(1);
            tracing::warn!("Dead letter queue has zero capacity, dropping entry");
            return;
        }

        if queue.len() >= self.max_size {
            queue.pop_front();
            metrics::counter!(crate::metrics::DEAD_LETTERS_DROPPED).increment(1);
            tracing::warn!(
                max_size = self.max_size,
                "Dead letter queue at capacity, dropping oldest entry"
            );
        }

        queue.push_back(DeadLetter {
            payload,
            attempts,
            error_message,
            dead_lettered_at: Utc::now(),
        });

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(crate::metrics::DEAD_LETTER_QUEUE_SIZE).set(queue.len() as f64);
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every entry, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();

        metrics::gauge!(crate::metrics::DEAD_LETTER_QUEUE_SIZE).set(0.0);
        tracing::info!(count = entries.len(), "Drained dead letter queue");

        entries
    }

    /// The oldest entry, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Maximum number of entries kept.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_drain_in_order() {
        let dlq = DeadLetterQueue::new(10);
        dlq.push(1, "first".to_string(), 1);
        dlq.push(2, "second".to_string(), 4);

        assert_eq!(dlq.len(), 2);
        let entries = dlq.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, 1);
        assert_eq!(entries[1].attempts, 4);
        assert_eq!(entries[1].error_message, "second");
        assert!(dlq.is_empty());
    }

    #[test]
    fn drops_oldest_at_capacity() {
        let dlq = DeadLetterQueue::new(2);
        dlq.push("a", "e".to_string(), 1);
        dlq.push("b", "e".to_string(), 1);
        dlq.push("c", "e".to_string(), 1);

        assert_eq!(dlq.len(), 2);
        assert_eq!(dlq.peek().map(|entry| entry.payload), Some("b"));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let dlq = DeadLetterQueue::new(0);
        dlq.push((), "e".to_string(), 1);
        assert!(dlq.is_empty());
    }

    #[test]
    fn clones_share_storage() {
        let dlq = DeadLetterQueue::default();
        let other = dlq.clone();
        dlq.push(7, "e".to_string(), 2);
        assert_eq!(other.len(), 1);
        assert_eq!(other.max_size(), 1000);
    }
}
