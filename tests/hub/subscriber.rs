use std::sync::{Arc, Mutex};

use rabbit_hub::broker::{Binding, ExchangeKind, Operation};
use rabbit_hub::{HubConfig, MemoryBroker};

use crate::support::{hub, only_queue, Recorder, Seen};

fn binding(exchange: &str, routing_key: &str) -> Binding {
    Binding {
        exchange: exchange.to_string(),
        routing_key: routing_key.to_string(),
    }
}

#[tokio::test]
async fn order_scenario_relays_and_acknowledges() {
    let broker = MemoryBroker::new();
    let config = HubConfig::from_json(
        r#"{"task": "subDurable", "channel": "orders", "routingKeys": ["order.*"], "ack": true}"#,
    )
    .unwrap();
    let hub = hub(&broker, config);
    let recorder = Recorder::attach(&hub);

    hub.connect().await.unwrap();
    let queue = only_queue(&broker);

    broker.publish("orders", "order.created", b"A").unwrap();

    assert_eq!(
        recorder.all(),
        vec![Seen::Connection, Seen::Message("A".to_string(), None)]
    );
    assert_eq!(broker.outstanding(&queue), 1);

    hub.ack();

    assert_eq!(broker.outstanding(&queue), 0);
    assert_eq!(broker.acknowledged(&queue), 1);
    assert_eq!(recorder.messages(), vec!["A"]);
}

#[tokio::test]
async fn setup_declares_exchange_then_queue_then_subscribes_and_binds() {
    let broker = MemoryBroker::new();
    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_channel("orders")
            .with_queue_name("billing")
            .with_routing_keys(["order.*", "refund.#"]),
    );

    hub.connect().await.unwrap();

    assert_eq!(broker.exchange_kind("orders"), Some(ExchangeKind::Topic));
    assert!(broker.has_queue("billing"));
    assert!(broker.has_consumer("billing"));
    assert_eq!(
        broker.bindings("billing"),
        vec![binding("orders", "order.*"), binding("orders", "refund.#")]
    );
    assert_eq!(broker.calls(Operation::DeclareExchange), 1);
    assert_eq!(broker.calls(Operation::DeclareQueue), 1);
    assert_eq!(broker.calls(Operation::SubscribeQueue), 1);
}

#[tokio::test]
async fn one_bind_per_routing_key() {
    let key_sets: [Option<Vec<&str>>; 4] = [
        None,
        Some(vec![]),
        Some(vec!["a.*"]),
        Some(vec!["a.*", "b.#", "c.d"]),
    ];

    for keys in key_sets {
        let broker = MemoryBroker::new();
        let mut config = HubConfig::new("subDurable")
            .with_channel("events")
            .with_queue_name("q");
        if let Some(keys) = &keys {
            config = config.with_routing_keys(keys.iter().copied());
        }
        let hub = hub(&broker, config);

        hub.connect().await.unwrap();

        let expected = keys.as_ref().map(Vec::len).unwrap_or(1);
        assert_eq!(broker.calls(Operation::BindQueue), expected);
        assert_eq!(broker.bindings("q").len(), expected);
        if keys.is_none() {
            assert_eq!(broker.bindings("q"), vec![binding("events", "#")]);
        }
    }
}

#[tokio::test]
async fn no_channel_uses_the_broadcast_exchange() {
    let broker = MemoryBroker::new();
    let hub = hub(&broker, HubConfig::new("subDurable").with_queue_name("all"));
    let recorder = Recorder::attach(&hub);

    hub.connect().await.unwrap();
    broker.publish("amq.fanout", "anything", b"broadcast").unwrap();

    assert_eq!(broker.bindings("all"), vec![binding("amq.fanout", "#")]);
    assert_eq!(recorder.messages(), vec!["broadcast"]);
}

#[tokio::test]
async fn unnamed_queue_is_generated_by_the_broker() {
    let broker = MemoryBroker::new();
    let hub = hub(&broker, HubConfig::new("subDurable").with_channel("orders"));

    hub.connect().await.unwrap();

    assert!(only_queue(&broker).starts_with("amq.gen-"));
}

#[tokio::test]
async fn routing_key_is_dropped_on_relay() {
    let broker = MemoryBroker::new();
    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_channel("orders")
            .with_queue_name("q"),
    );
    let recorder = Recorder::attach(&hub);
    hub.connect().await.unwrap();

    broker.publish("orders", "order.shipped", b"parcel").unwrap();

    assert!(recorder
        .all()
        .contains(&Seen::Message("parcel".to_string(), None)));
}

#[tokio::test]
async fn invalid_utf8_is_decoded_lossily() {
    let broker = MemoryBroker::new();
    let hub = hub(&broker, HubConfig::new("subDurable").with_queue_name("q"));
    let recorder = Recorder::attach(&hub);
    hub.connect().await.unwrap();

    broker.enqueue("q", &[b'o', b'k', 0xff]).unwrap();

    assert_eq!(recorder.messages(), vec!["ok\u{fffd}"]);
}

#[tokio::test]
async fn delivery_order_is_preserved() {
    let broker = MemoryBroker::new();
    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_channel("orders")
            .with_queue_name("q"),
    );
    let recorder = Recorder::attach(&hub);
    hub.connect().await.unwrap();

    for i in 0..5 {
        broker
            .publish("orders", "order.created", format!("m{}", i).as_bytes())
            .unwrap();
    }

    assert_eq!(recorder.messages(), vec!["m0", "m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn each_ack_consumes_exactly_one_delivery() {
    let broker = MemoryBroker::new();
    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_channel("orders")
            .with_queue_name("q")
            .with_ack(true),
    );
    let recorder = Recorder::attach(&hub);
    hub.connect().await.unwrap();

    for i in 0..5 {
        broker
            .publish("orders", "order.created", format!("m{}", i).as_bytes())
            .unwrap();
    }
    // prefetch 1: one delivery outstanding, the rest waiting
    assert_eq!(recorder.messages(), vec!["m0"]);
    assert_eq!(broker.outstanding("q"), 1);
    assert_eq!(broker.pending("q"), 4);

    for n in 1..=3u64 {
        hub.ack();
        assert_eq!(broker.acknowledged("q"), n);
    }
    assert_eq!(recorder.messages(), vec!["m0", "m1", "m2", "m3"]);

    hub.ack();
    hub.ack();
    // nothing left to acknowledge: further acks change nothing
    hub.ack();
    hub.ack();
    assert_eq!(broker.acknowledged("q"), 5);
    assert_eq!(broker.outstanding("q"), 0);
    assert_eq!(recorder.messages().len(), 5);
}

#[tokio::test]
async fn prefetch_bounds_outstanding_deliveries() {
    let broker = MemoryBroker::new();
    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_queue_name("q")
            .with_ack(true)
            .with_prefetch(3),
    );
    let recorder = Recorder::attach(&hub);
    hub.connect().await.unwrap();

    for body in ["a", "b", "c", "d"] {
        broker.enqueue("q", body.as_bytes()).unwrap();
    }

    assert_eq!(recorder.messages(), vec!["a", "b", "c"]);
    assert_eq!(broker.outstanding("q"), 3);
    hub.ack();
    assert_eq!(recorder.messages(), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn without_ack_mode_acks_have_no_effect() {
    let broker = MemoryBroker::new();
    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_channel("orders")
            .with_queue_name("q"),
    );
    let recorder = Recorder::attach(&hub);
    hub.connect().await.unwrap();

    broker.publish("orders", "order.created", b"a").unwrap();
    broker.publish("orders", "order.created", b"b").unwrap();
    hub.ack();

    assert_eq!(recorder.messages(), vec!["a", "b"]);
    assert_eq!(broker.outstanding("q"), 0);
    assert_eq!(broker.acknowledged("q"), 0);
    assert_eq!(broker.calls(Operation::AckOne), 0);
}

#[tokio::test]
async fn ack_from_inside_the_message_listener() {
    let broker = MemoryBroker::new();
    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_queue_name("q")
            .with_ack(true),
    );
    let handled = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&handled);
    hub.on_connection(move |hub| {
        let sink = Arc::clone(&sink);
        let acker = hub.clone();
        hub.on_message(move |payload, _| {
            sink.lock().unwrap().push(payload.to_string());
            acker.ack();
        });
    });
    hub.connect().await.unwrap();

    for body in ["1", "2", "3"] {
        broker.enqueue("q", body.as_bytes()).unwrap();
    }

    assert_eq!(*handled.lock().unwrap(), vec!["1", "2", "3"]);
    assert_eq!(broker.acknowledged("q"), 3);
    assert_eq!(broker.outstanding("q"), 0);
}

#[tokio::test]
async fn waiting_messages_arrive_after_connection() {
    let broker = MemoryBroker::new();
    broker.create_queue("q");
    broker.enqueue("q", b"queued earlier").unwrap();

    let hub = hub(&broker, HubConfig::new("subDurable").with_queue_name("q"));
    let recorder = Recorder::attach(&hub);
    hub.connect().await.unwrap();

    assert_eq!(
        recorder.all(),
        vec![
            Seen::Connection,
            Seen::Message("queued earlier".to_string(), None)
        ]
    );
}

#[tokio::test]
async fn clean_start_recreates_the_queue() {
    let broker = MemoryBroker::new();
    broker.create_queue("q1");
    broker.create_binding("q1", "amq.topic", "stale.#").unwrap();
    broker.enqueue("q1", b"stale message").unwrap();

    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_channel("orders")
            .with_queue_name("q1")
            .with_routing_keys(["order.*"])
            .with_clean(true),
    );
    let recorder = Recorder::attach(&hub);
    hub.connect().await.unwrap();

    assert_eq!(broker.calls(Operation::DestroyQueue), 1);
    assert_eq!(broker.bindings("q1"), vec![binding("orders", "order.*")]);
    assert_eq!(broker.pending("q1"), 0);
    assert_eq!(recorder.all(), vec![Seen::Connection]);
}

#[tokio::test]
async fn without_clean_the_queue_keeps_its_state() {
    let broker = MemoryBroker::new();
    broker.create_queue("q1");
    broker.create_binding("q1", "amq.topic", "stale.#").unwrap();

    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_channel("orders")
            .with_queue_name("q1")
            .with_routing_keys(["order.*"]),
    );
    hub.connect().await.unwrap();

    assert_eq!(broker.calls(Operation::DestroyQueue), 0);
    assert_eq!(
        broker.bindings("q1"),
        vec![binding("amq.topic", "stale.#"), binding("orders", "order.*")]
    );
}

#[tokio::test]
async fn clean_without_queue_name_is_skipped() {
    let broker = MemoryBroker::new();
    let hub = hub(
        &broker,
        HubConfig::new("subDurable")
            .with_channel("orders")
            .with_clean(true),
    );

    hub.connect().await.unwrap();

    assert_eq!(broker.calls(Operation::DestroyQueue), 0);
}

#[tokio::test]
async fn second_subscriber_on_the_same_queue_is_refused() {
    let broker = MemoryBroker::new();
    let config = HubConfig::new("subDurable")
        .with_channel("orders")
        .with_queue_name("shared");
    let first = hub(&broker, config.clone());
    let second = hub(&broker, config);
    let recorder = Recorder::attach(&second);

    first.connect().await.unwrap();
    // lenient by default: the failure is reported, the hub carries on
    second.connect().await.unwrap();

    let errors = recorder.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("resource locked"), "{}", errors[0]);
}
