use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::broker::{
    BrokerConnection, BrokerError, Consumer, ExchangeOptions, QueueOptions, SubscribeOptions,
};
use crate::error::HubError;

/// The hub's view of its connection, handed to adapters during start-up.
///
/// Suspending operations are bounded by the operation timeout; a timeout is
/// reported as [`HubError::Timeout`]. Broker failures become
/// [`HubError::Broker`].
#[derive(Clone)]
pub struct Channel {
    connection: Arc<dyn BrokerConnection>,
    timeout: Duration,
}

impl Channel {
    pub fn new(connection: Arc<dyn BrokerConnection>, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }

    pub fn connection(&self) -> &Arc<dyn BrokerConnection> {
        &self.connection
    }

    pub async fn declare_exchange(&self, options: ExchangeOptions) -> Result<String, HubError> {
        self.bounded("declare exchange", self.connection.declare_exchange(options))
            .await
    }

    pub async fn declare_queue(&self, options: QueueOptions) -> Result<String, HubError> {
        self.bounded("declare queue", self.connection.declare_queue(options))
            .await
    }

    pub async fn subscribe_queue(
        &self,
        queue: &str,
        options: SubscribeOptions,
        consumer: Consumer,
    ) -> Result<(), HubError> {
        self.bounded(
            "subscribe queue",
            self.connection.subscribe_queue(queue, options, consumer),
        )
        .await
    }

    pub async fn destroy_queue(&self, queue: &str) -> Result<(), HubError> {
        self.bounded("destroy queue", self.connection.destroy_queue(queue))
            .await
    }

    pub fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), HubError> {
        self.connection
            .bind_queue(queue, exchange, routing_key)
            .map_err(HubError::Broker)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, HubError>
    where
        F: Future<Output = Result<T, BrokerError>>,
    {
        match time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(HubError::Broker),
            Err(_) => Err(HubError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }
}
