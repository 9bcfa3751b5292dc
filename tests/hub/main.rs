//! Hub integration tests, run against the in-memory broker.
//!
//! - lifecycle: connect / send / ack / end and the event contract
//! - subscriber: durable subscriber set-up, relay and ack flow control
//! - publisher: publishing through a hub, end to end with a subscriber
//! - failures: connection errors, timeouts, strict and lenient adapter start

mod publisher;
mod subscriber;
