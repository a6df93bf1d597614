//! The `broker` module is the seam between the pipeline and the message
//! broker.
//!
//! [`Connector`] opens connections and [`Connection`] is the live handle the
//! publisher and consumer drive. Two implementations exist:
//!
//! - [`amqp`]: RabbitMQ over AMQP 0.9.1 using `lapin`.
//! - [`memory`]: an in-process broker with durable-queue, ack/nack and
//!   redelivery semantics plus failure injection, used by the tests.

pub mod amqp;
pub mod endpoint;
pub mod memory;
pub mod message;

use async_trait::async_trait;

use crate::utils::error::ConnectionError;

pub use amqp::AmqpConnector;
pub use endpoint::BrokerEndpoint;
pub use memory::MemoryBroker;
pub use message::{Delivery, OutboundMessage};

/// What the broker said about a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport; no confirmation was requested.
    Sent,
    /// Publisher confirms are on and the broker acked the message.
    Confirmed,
    /// Publisher confirms are on and the broker nacked the message.
    Rejected,
}

/// Opens connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Self::Connection, ConnectionError>;
}

/// A live connection plus channel. Any error returned here means the handle
/// is no longer usable and must be replaced, never repaired.
#[async_trait]
pub trait Connection: Send {
    /// Declares `queue` as durable. Idempotent.
    async fn declare_queue(&mut self, queue: &str) -> Result<(), ConnectionError>;

    /// Publishes a persistent message to `queue` through the default exchange.
    async fn publish(
        &mut self,
        queue: &str,
        message: &OutboundMessage,
    ) -> Result<PublishOutcome, ConnectionError>;

    /// Starts a manual-ack subscription with at most `prefetch` unacked
    /// deliveries in flight.
    async fn subscribe(&mut self, queue: &str, prefetch: u16) -> Result<(), ConnectionError>;

    /// Waits for the next delivery of the active subscription.
    async fn next_delivery(&mut self) -> Result<Delivery, ConnectionError>;

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), ConnectionError>;

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), ConnectionError>;

    /// Orderly close. Unacked deliveries go back to the queue.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

#[cfg(test)]
mod tests;
