//! # Logbus Core
//!
//! Broker-agnostic publish/subscribe contract for Logbus.
//!
//! This crate defines the abstractions every broker adapter implements, so that
//! application code can publish and subscribe without knowing which messaging
//! backend sits underneath.
//!
//! ## Core Concepts
//!
//! - **Message**: A header map plus an opaque body
//! - **Event**: One delivered message, handed to a subscription's handler
//! - **Handler**: User code invoked once per delivered event
//! - **Broker**: Lifecycle (`init`, `connect`, `disconnect`) plus `publish`/`subscribe`
//! - **Subscriber**: Handle for one active subscription
//!
//! ## Example
//!
//! ```ignore
//! use logbus_core::{Broker, Message, SubscribeOptions, PublishOptions, handler_fn};
//!
//! async fn run(broker: &dyn Broker) -> Result<(), logbus_core::BrokerError> {
//!     broker.connect().await?;
//!
//!     let subscriber = broker
//!         .subscribe(
//!             "orders",
//!             handler_fn(|event| async move {
//!                 println!("{} bytes on {}", event.message().body.len(), event.topic());
//!                 Ok(())
//!             }),
//!             SubscribeOptions::default(),
//!         )
//!         .await?;
//!
//!     let message = Message::new(vec![1, 2, 3]).with_header("partition", "2");
//!     broker.publish("orders", &message, PublishOptions::default()).await?;
//!
//!     subscriber.unsubscribe().await?;
//!     broker.disconnect().await
//! }
//! ```

pub mod broker;
pub mod error;
pub mod event;
pub mod message;
pub mod options;

pub use broker::{Broker, BrokerFuture, Subscriber};
pub use error::{BrokerError, EventError, HandlerError};
pub use event::{Event, Handler, HandlerFuture, handler_fn};
pub use message::{Message, PARTITION_HEADER};
pub use options::{BrokerOptions, Extensions, PublishOptions, SubscribeOptions};
