//! Durable subscriber for a pub/sub topology with durable queues.
//!
//! Start-up runs strictly in order:
//! 1. exchange: passive lookup of the broadcast exchange, or a durable topic
//!    exchange named after the channel
//! 2. queue: durable, never auto-deleted, named after `queueName`
//! 3. subscription: exclusive, acknowledging when `ack` is set
//! 4. one binding per routing key
//!
//! Every delivery is relayed to the hub as a string without its routing key.
//! In ack mode each hub `ack` acknowledges the oldest outstanding delivery.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use super::Adapter;
use crate::broker::{Consumer, Delivery};
use crate::error::HubError;
use crate::hub::{Channel, Hub, Subscription};

#[derive(Default)]
pub struct DurableSubscriber {
    subscriptions: Vec<Subscription>,
}

#[async_trait]
impl Adapter for DurableSubscriber {
    async fn start(&mut self, hub: &Hub, channel: &Channel) -> Result<(), HubError> {
        let config = hub.config();

        let exchange = channel.declare_exchange(config.exchange()).await?;
        debug!("exchange '{}' ready", exchange);

        let queue = channel.declare_queue(config.queue()).await?;

        // registered before subscribing: deliveries may arrive as soon as the
        // consumer exists
        if config.ack {
            let connection = Arc::clone(channel.connection());
            let weak = hub.downgrade();
            let target = queue.clone();
            self.subscriptions.push(hub.on_ack(move || {
                if let Err(e) = connection.ack_one(&target) {
                    if let Some(hub) = weak.upgrade() {
                        hub.report(HubError::Broker(e));
                    }
                }
            }));
        }

        info!(
            "subscribing to queue: {} on: {}",
            queue,
            channel.connection().vhost()
        );
        let weak = hub.downgrade();
        let consumer: Consumer = Arc::new(move |delivery: Delivery| {
            if let Some(hub) = weak.upgrade() {
                hub.relay(delivery.body_str());
            }
        });
        channel
            .subscribe_queue(&queue, config.subscription(), consumer)
            .await?;

        for routing_key in config.routing_keys() {
            channel.bind_queue(&queue, &exchange, &routing_key)?;
            debug!("bound '{}' to '{}' with '{}'", queue, exchange, routing_key);
        }
        Ok(())
    }

    fn detach(&mut self, hub: &Hub) {
        for subscription in self.subscriptions.drain(..) {
            hub.off(subscription);
        }
    }
}
