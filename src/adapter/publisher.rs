use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use super::Adapter;
use crate::error::HubError;
use crate::hub::{Channel, Hub, Subscription};

/// Routing key used when `send` is called without one
pub const DEFAULT_ROUTING_KEY: &str = "";

/// Publishes every hub `message` to the configured exchange.
#[derive(Default)]
pub struct Publisher {
    subscription: Option<Subscription>,
}

#[async_trait]
impl Adapter for Publisher {
    async fn start(&mut self, hub: &Hub, channel: &Channel) -> Result<(), HubError> {
        let exchange = channel.declare_exchange(hub.config().exchange()).await?;
        debug!("publishing to exchange '{}'", exchange);

        let connection = Arc::clone(channel.connection());
        let weak = hub.downgrade();
        self.subscription = Some(hub.on_message(move |payload, routing_key| {
            let key = routing_key.unwrap_or(DEFAULT_ROUTING_KEY);
            if let Err(e) = connection.publish(&exchange, key, payload.as_bytes()) {
                if let Some(hub) = weak.upgrade() {
                    hub.report(HubError::Broker(e));
                }
            }
        }));
        Ok(())
    }

    fn detach(&mut self, hub: &Hub) {
        if let Some(subscription) = self.subscription.take() {
            hub.off(subscription);
        }
    }
}
