//! Delivered events and the handlers that consume them.

use crate::error::{EventError, HandlerError};
use crate::message::Message;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// One message delivered to a subscription.
///
/// Adapters create a fresh event per delivery and move it into the handler
/// invocation; it is dropped when the handler returns.
pub trait Event: Send + Sync + fmt::Debug {
    /// Topic the message was read from.
    fn topic(&self) -> &str;

    /// The delivered message.
    fn message(&self) -> &Message;

    /// Decoding problem detected while building the event, if any.
    fn error(&self) -> Option<&EventError>;
}

/// Future returned by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Subscription callback.
///
/// Handlers run on the subscription's worker and are awaited before the next
/// record is fetched, so a slow handler applies back-pressure to its own
/// subscription only. Returning an error suppresses the commit for that
/// delivery.
pub type Handler = Arc<dyn Fn(Box<dyn Event>) -> HandlerFuture + Send + Sync>;

/// Build a [`Handler`] from an async closure.
///
/// # Example
///
/// ```
/// use logbus_core::{handler_fn, HandlerError};
///
/// let handler = handler_fn(|event| async move {
///     if event.message().body.is_empty() {
///         return Err(HandlerError::new("empty body"));
///     }
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Box<dyn Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}
