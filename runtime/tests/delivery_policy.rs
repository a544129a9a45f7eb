//! Retry and dead-letter behavior as a consumer loop drives them.

use logbus_runtime::{DeadLetterQueue, RetryOutcome, RetryPolicy, retry_with_backoff};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_test::{assert_pending, assert_ready, task};

#[tokio::test]
async fn shutdown_interrupts_backoff_but_not_the_attempt() {
    let policy = RetryPolicy::builder()
        .max_retries(10)
        .initial_delay(Duration::from_secs(60))
        .build();
    let (stop, stopped) = oneshot::channel::<()>();

    let mut retry = task::spawn(retry_with_backoff(
        &policy,
        |_attempt| async { Err::<(), _>("handler down") },
        async {
            let _ = stopped.await;
        },
    ));

    // First attempt fails, then the loop sleeps.
    assert_pending!(retry.poll());

    let _ = stop.send(());
    assert!(retry.is_woken());

    let outcome = assert_ready!(retry.poll());
    assert_eq!(
        outcome,
        RetryOutcome::Cancelled {
            error: "handler down",
            attempts: 1
        }
    );
}

#[tokio::test]
async fn exhausted_delivery_lands_in_dead_letters() {
    let policy = RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(1))
        .build();
    let dead_letters = DeadLetterQueue::new(16);

    let outcome = retry_with_backoff(
        &policy,
        |attempt| async move { Err::<(), _>(format!("attempt {attempt} rejected")) },
        std::future::pending(),
    )
    .await;

    match outcome {
        RetryOutcome::Exhausted { error, attempts } => {
            dead_letters.push("order-17", error, attempts);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }

    let entry = dead_letters.peek();
    assert_eq!(entry.as_ref().map(|e| e.payload), Some("order-17"));
    assert_eq!(entry.as_ref().map(|e| e.attempts), Some(3));
    assert_eq!(
        entry.map(|e| e.error_message),
        Some("attempt 2 rejected".to_string())
    );
}

#[tokio::test]
async fn no_retry_policy_invokes_once() {
    let mut calls = 0;
    let outcome = retry_with_backoff(
        &RetryPolicy::no_retry(),
        |_attempt| {
            calls += 1;
            async { Err::<(), _>("nope") }
        },
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
    assert_eq!(calls, 1);
}
