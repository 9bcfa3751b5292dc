//! A publisher and an acknowledging durable subscriber sharing an
//! in-memory broker.
//!
//! ```text
//! cargo run --example pubsub
//! ```

use std::error::Error;
use std::sync::Arc;

use flexi_logger::{colored_with_thread, Logger, WriteMode};
use log::info;
use rabbit_hub::{HubConfig, MemoryBroker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // hold the handle, the logger stops when it is dropped
    let _logger = Logger::try_with_str("debug")?
        .log_to_stdout()
        .write_mode(WriteMode::Async)
        .format(colored_with_thread)
        .use_utc()
        .start()?;

    let broker = Arc::new(MemoryBroker::new());

    let subscriber = rabbit_hub::create(
        HubConfig::from_json(
            r#"{
                "task": "subDurable",
                "channel": "orders",
                "queueName": "billing",
                "routingKeys": ["order.*"],
                "ack": true
            }"#,
        )?,
        broker.clone(),
    );
    subscriber.on_connection(|hub| {
        let acker = hub.clone();
        hub.on_message(move |msg, _| {
            info!("billing received {}", msg);
            acker.ack();
        });
    });
    subscriber.on_error(|e| log::error!("subscriber: {}", e));
    subscriber.connect().await?;

    let publisher = rabbit_hub::create(HubConfig::new("pub").with_channel("orders"), broker.clone());
    publisher.on_error(|e| log::error!("publisher: {}", e));
    publisher.connect().await?;

    for (key, order) in [
        ("order.created", r#"{"id": 1}"#),
        ("order.paid", r#"{"id": 1}"#),
        ("invoice.sent", r#"{"id": 7}"#),
        ("order.shipped", r#"{"id": 1}"#),
    ] {
        publisher.send(order, Some(key));
    }

    info!(
        "billing acknowledged {} of {} published messages",
        broker.acknowledged("billing"),
        broker.calls(rabbit_hub::broker::Operation::Publish)
    );

    publisher.end();
    subscriber.end();
    Ok(())
}
