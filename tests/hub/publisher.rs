use rabbit_hub::broker::{ExchangeKind, Operation};
use rabbit_hub::{HubConfig, HubState, MemoryBroker};

use crate::support::{hub, Recorder, Seen};

#[tokio::test]
async fn published_messages_reach_a_matching_subscriber() {
    let broker = MemoryBroker::new();
    let subscriber = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_channel("orders")
            .with_queue_name("billing")
            .with_routing_keys(["order.*"]),
    );
    let received = Recorder::attach(&subscriber);
    subscriber.connect().await.unwrap();

    let publisher = hub(&broker, HubConfig::new("pub").with_channel("orders"));
    publisher.connect().await.unwrap();

    publisher.send("created", Some("order.created"));
    publisher.send("ignored", Some("invoice.created"));
    publisher.send("too deep", Some("order.created.eu"));
    publisher.send("shipped", Some("order.shipped"));

    assert_eq!(received.messages(), vec!["created", "shipped"]);
    assert_eq!(broker.calls(Operation::Publish), 4);
}

#[tokio::test]
async fn publisher_declares_a_durable_topic_exchange() {
    let broker = MemoryBroker::new();
    let publisher = hub(&broker, HubConfig::new("publish").with_channel("audit"));

    publisher.connect().await.unwrap();

    assert_eq!(broker.exchange_kind("audit"), Some(ExchangeKind::Topic));
    assert_eq!(publisher.state(), HubState::Active);
    // publishers never declare queues
    assert!(broker.queue_names().is_empty());
}

#[tokio::test]
async fn send_without_routing_key_uses_the_empty_key() {
    let broker = MemoryBroker::new();
    broker.create_queue("exact");
    broker.create_queue("everything");
    let publisher = hub(&broker, HubConfig::new("pub").with_channel("orders"));
    publisher.connect().await.unwrap();
    broker.create_binding("exact", "orders", "").unwrap();
    broker.create_binding("everything", "orders", "#").unwrap();

    publisher.send("no key", None);

    assert_eq!(broker.pending("exact"), 1);
    assert_eq!(broker.pending("everything"), 1);
}

#[tokio::test]
async fn without_channel_messages_fan_out_to_every_subscriber() {
    let broker = MemoryBroker::new();
    let mut subscribers = Vec::new();
    let mut recorders = Vec::new();
    for queue in ["left", "right"] {
        let subscriber = hub(&broker, HubConfig::new("subDurable").with_queue_name(queue));
        recorders.push(Recorder::attach(&subscriber));
        subscriber.connect().await.unwrap();
        subscribers.push(subscriber);
    }

    let publisher = hub(&broker, HubConfig::new("pub"));
    publisher.connect().await.unwrap();
    publisher.send("to all", Some("whatever.key"));

    for recorder in &recorders {
        assert_eq!(recorder.messages(), vec!["to all"]);
    }
}

#[tokio::test]
async fn publisher_hub_also_sees_its_own_messages() {
    let broker = MemoryBroker::new();
    let publisher = hub(&broker, HubConfig::new("pub").with_channel("orders"));
    let recorder = Recorder::attach(&publisher);
    publisher.connect().await.unwrap();

    publisher.send("local copy", Some("order.created"));

    assert_eq!(
        recorder.all(),
        vec![
            Seen::Connection,
            Seen::Message("local copy".to_string(), Some("order.created".to_string())),
        ]
    );
}

#[tokio::test]
async fn publish_failures_are_reported_as_errors() {
    let broker = MemoryBroker::new();
    let publisher = hub(&broker, HubConfig::new("pub").with_channel("orders"));
    let recorder = Recorder::attach(&publisher);
    publisher.connect().await.unwrap();
    broker.fail(Operation::Publish, "disk full");

    publisher.send("lost", Some("order.created"));

    let errors = recorder.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("disk full"), "{}", errors[0]);
    // a failed publish does not take the hub down
    assert_eq!(publisher.state(), HubState::Active);
}

#[tokio::test]
async fn send_after_end_does_not_publish() {
    let broker = MemoryBroker::new();
    let publisher = hub(&broker, HubConfig::new("pub").with_channel("orders"));
    publisher.connect().await.unwrap();
    publisher.end();

    publisher.send("too late", Some("order.created"));

    assert_eq!(broker.calls(Operation::Publish), 0);
}
