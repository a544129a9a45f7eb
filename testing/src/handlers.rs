//! Handler doubles.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use logbus_core::{EventError, Handler, HandlerError, Message, handler_fn};
use std::sync::{Arc, Mutex};

/// One handler invocation as seen by a [`RecordingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Topic of the delivered event
    pub topic: String,
    /// The delivered message
    pub message: Message,
    /// Decoding problem reported by the event
    pub error: Option<EventError>,
    /// Whether the handler returned `Ok`
    pub succeeded: bool,
}

#[derive(Default)]
struct Script {
    invocations: Vec<Invocation>,
    failures_left: usize,
    always_fail: bool,
}

/// A handler that records every invocation and fails on demand.
///
/// # Example
///
/// ```
/// use logbus_testing::RecordingHandler;
///
/// let recorder = RecordingHandler::failing_times(2);
/// let handler = recorder.handler();
/// // subscribe with `handler`; the first two invocations return an error
/// # let _ = handler;
/// assert_eq!(recorder.invocation_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct RecordingHandler {
    script: Arc<Mutex<Script>>,
}

impl RecordingHandler {
    /// A handler that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler whose first `failures` invocations fail.
    #[must_use]
    pub fn failing_times(failures: usize) -> Self {
        let recorder = Self::default();
        recorder.script.lock().unwrap().failures_left = failures;
        recorder
    }

    /// A handler that never succeeds.
    #[must_use]
    pub fn always_failing() -> Self {
        let recorder = Self::default();
        recorder.script.lock().unwrap().always_fail = true;
        recorder
    }

    /// The [`Handler`] to subscribe with.
    #[must_use]
    pub fn handler(&self) -> Handler {
        let script = Arc::clone(&self.script);
        handler_fn(move |event| {
            let mut script = script.lock().unwrap();
            let fail = script.always_fail || script.failures_left > 0;
            script.failures_left = script.failures_left.saturating_sub(1);
            script.invocations.push(Invocation {
                topic: event.topic().to_string(),
                message: event.message().clone(),
                error: event.error().cloned(),
                succeeded: !fail,
            });
            drop(script);

            async move {
                if fail {
                    Err(HandlerError::new("scripted failure"))
                } else {
                    Ok(())
                }
            }
        })
    }

    /// Every invocation so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.script.lock().unwrap().invocations.clone()
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.script.lock().unwrap().invocations.len()
    }

    /// Bodies of the successful invocations, in order.
    #[must_use]
    pub fn handled_bodies(&self) -> Vec<Vec<u8>> {
        self.script
            .lock()
            .unwrap()
            .invocations
            .iter()
            .filter(|invocation| invocation.succeeded)
            .map(|invocation| invocation.message.body.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logbus_core::Event;

    #[derive(Debug)]
    struct Fixed(Message);

    impl Event for Fixed {
        fn topic(&self) -> &str {
            "t"
        }

        fn message(&self) -> &Message {
            &self.0
        }

        fn error(&self) -> Option<&EventError> {
            None
        }
    }

    #[tokio::test]
    async fn fails_scripted_number_of_times() {
        let recorder = RecordingHandler::failing_times(1);
        let handler = recorder.handler();

        assert!(handler(Box::new(Fixed(Message::new(vec![1])))).await.is_err());
        assert!(handler(Box::new(Fixed(Message::new(vec![1])))).await.is_ok());

        assert_eq!(recorder.invocation_count(), 2);
        assert_eq!(recorder.handled_bodies(), vec![vec![1]]);
    }
}
