//! Broker transport - the capability contract the hub talks to.
//!
//! The hub never speaks a wire protocol itself. Everything it needs from a
//! broker goes through two traits:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Connector                                │
//! │  connect(url, heartbeat) -> BrokerConnection   (= "ready")  │
//! │                            -> BrokerError      (= "error")  │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 BrokerConnection                            │
//! │  declare_exchange / declare_queue / subscribe_queue         │
//! │  destroy_queue / bind_queue / publish / ack_one / close     │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//! ┌─────────────────┐               ┌─────────────────────────┐
//! │  MemoryBroker   │               │  AMQP client (external) │
//! │   (included)    │               │                         │
//! └─────────────────┘               └─────────────────────────┘
//! ```

mod connection;
mod error;
mod in_memory;
mod options;
pub mod topic;

pub use connection::{BrokerConnection, Connector};
pub use error::BrokerError;
pub use in_memory::{Binding, ConnectionInfo, MemoryBroker, MemoryConnection, Operation};
pub use options::{
    Consumer, Delivery, ErrorHandler, ExchangeKind, ExchangeOptions, QueueOptions,
    SubscribeOptions,
};
