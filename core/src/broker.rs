//! The broker and subscriber contracts.
//!
//! # Dyn Compatibility
//!
//! Both traits return explicit `Pin<Box<dyn Future>>` values instead of using
//! `async fn`, so adapters can be held as `Arc<dyn Broker>` and subscriptions
//! as `Box<dyn Subscriber>`.

use crate::error::BrokerError;
use crate::event::Handler;
use crate::message::Message;
use crate::options::{BrokerOptions, PublishOptions, SubscribeOptions};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by broker operations.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// A publish/subscribe broker.
///
/// # Lifecycle
///
/// ```text
/// new(options) ──► connect() ──► publish / subscribe ──► disconnect()
///      ▲               ▲
///      └── init(options) (no reconnect; call connect again)
/// ```
///
/// # Delivery
///
/// Adapters deliver at least once: a handler may see the same message again
/// after a failure, so handlers must be idempotent.
pub trait Broker: Send + Sync {
    /// Merge new options into the stored snapshot.
    ///
    /// Does not reconnect; call [`connect`](Self::connect) to apply the new
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidOption`] if an option cannot be applied.
    fn init(&self, options: BrokerOptions) -> Result<(), BrokerError>;

    /// A copy of the current option snapshot.
    fn options(&self) -> BrokerOptions;

    /// The configured bootstrap endpoint, or `"empty"` when none is set.
    fn address(&self) -> String;

    /// Build backend clients, replacing any previously held ones.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connection`] if a client cannot be built. No
    /// client is retained on failure.
    fn connect(&self) -> BrokerFuture<'_, ()>;

    /// Stop every subscription and release backend clients.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Disconnect`] carrying every release failure.
    fn disconnect(&self) -> BrokerFuture<'_, ()>;

    /// Publish one message to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] before `connect`, or
    /// [`BrokerError::Publish`] with the backend's error.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        message: &'a Message,
        options: PublishOptions,
    ) -> BrokerFuture<'a, ()>;

    /// Register interest in a topic and start delivering to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotConnected`] before `connect`, or
    /// [`BrokerError::Subscription`] if the backend rejects the topic. No
    /// worker is started on failure.
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        handler: Handler,
        options: SubscribeOptions,
    ) -> BrokerFuture<'a, Box<dyn Subscriber>>;

    /// Short adapter name.
    fn name(&self) -> &'static str;
}

/// Handle for one active subscription.
pub trait Subscriber: Send + Sync {
    /// Options the subscription was created with.
    fn options(&self) -> &SubscribeOptions;

    /// The subscribed topic.
    fn topic(&self) -> &str;

    /// Unregister the topic and stop this subscription's worker.
    ///
    /// Calling it more than once is allowed; later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unsubscribe`] if the backend rejects the
    /// unregistration. The worker is stopped regardless.
    fn unsubscribe(&self) -> BrokerFuture<'_, ()>;
}
