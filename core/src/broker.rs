//! Message broker contract.
//!
//! A named, durable, FIFO-ish queue carrying UTF-8 text payloads. Delivery is
//! at-least-once and consumers acknowledge on receipt, so consumers must
//! tolerate redelivery.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! broker.declare_queue("reservations").await?;
//! broker.publish("reservations", "12,5").await?;
//!
//! let mut stream = broker.subscribe("reservations").await?;
//! while let Some(payload) = stream.next().await {
//!     match payload {
//!         Ok(text) => handle(&text),
//!         Err(e) => tracing::error!(error = %e, "Receive failed"),
//!     }
//! }
//! ```

use crate::error::BrokerError;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// Stream of payloads delivered to one subscription.
///
/// Dropping the stream releases the subscription and its connection.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<String, BrokerError>> + Send>>;

/// Boxed future returned by [`MessageBroker`] methods.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send + 'a>>;

/// Queue-based message broker.
///
/// Methods return boxed futures so the broker can be shared as
/// `Arc<dyn MessageBroker>` between the reservation engine and the consumer
/// scheduler.
pub trait MessageBroker: Send + Sync {
    /// Declares a durable queue. Declaring an existing queue is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DeclareFailed`] if the broker rejects it.
    fn declare_queue(&self, queue: &str) -> BrokerFuture<'_, ()>;

    /// Publishes a text payload to a queue.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::PublishFailed`] if the broker does not
    /// acknowledge the payload.
    fn publish(&self, queue: &str, payload: &str) -> BrokerFuture<'_, ()>;

    /// Attaches a consumer to a queue.
    ///
    /// Consumers of the same queue compete: each payload goes to one of them.
    /// Payloads are acknowledged as they are yielded.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if the consumer cannot be
    /// created.
    fn subscribe(&self, queue: &str) -> BrokerFuture<'_, MessageStream>;
}
