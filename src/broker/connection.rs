//! Capability traits a broker transport must provide.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{BrokerError, Consumer, ErrorHandler, ExchangeOptions, QueueOptions, SubscribeOptions};

/// Opens connections to a broker.
///
/// A successful `connect` is the connection's `ready` signal; an error is its
/// `error` signal. Implementations might include:
/// - `MemoryBroker` - For testing and single-process scenarios
/// - an AMQP 0-9-1 client for RabbitMQ
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        heartbeat: Duration,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// An established broker connection.
///
/// Declarations and subscriptions may suspend until the broker answers.
/// Binding, publishing and acknowledging are fire-and-forget commands: they
/// return as soon as the command has been handed to the transport.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Virtual host this connection is attached to.
    fn vhost(&self) -> String;

    /// Declare an exchange, or look it up when `options.passive` is set.
    /// Returns the exchange name.
    async fn declare_exchange(&self, options: ExchangeOptions) -> Result<String, BrokerError>;

    /// Declare a queue and return its name (generated when `options.name`
    /// is empty).
    async fn declare_queue(&self, options: QueueOptions) -> Result<String, BrokerError>;

    /// Register `consumer` for every message delivered from `queue`.
    async fn subscribe_queue(
        &self,
        queue: &str,
        options: SubscribeOptions,
        consumer: Consumer,
    ) -> Result<(), BrokerError>;

    /// Delete a queue together with its bindings and messages.
    async fn destroy_queue(&self, queue: &str) -> Result<(), BrokerError>;

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
        -> Result<(), BrokerError>;

    fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Acknowledge the oldest outstanding delivery on `queue`.
    fn ack_one(&self, queue: &str) -> Result<(), BrokerError>;

    /// Close the connection. Closing twice is an error.
    fn close(&self) -> Result<(), BrokerError>;

    /// Register a handler for failures after the connection became ready.
    fn on_error(&self, handler: ErrorHandler);
}
