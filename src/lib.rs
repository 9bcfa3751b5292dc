//! A uniform hub for publishing to and durably subscribing from a message
//! broker exchange.
//!
//! - [`Hub`] owns the broker connection, starts the adapter for its task and
//!   relays messages through `connection` / `message` / `ack` / `close` /
//!   `error` events.
//! - [`adapter`] holds the role-specific set-up: [`Publisher`] and
//!   [`DurableSubscriber`].
//! - [`broker`] is the transport contract, plus [`MemoryBroker`], an
//!   in-memory implementation for tests and single-process use.

pub mod adapter;
pub mod broker;
pub mod config;
mod error;
pub mod hub;

pub use adapter::{Adapter, AdapterRegistry, DurableSubscriber, Publisher};
pub use broker::{BrokerConnection, BrokerError, Connector, MemoryBroker};
pub use config::{ErrorMode, HubConfig, BROADCAST_EXCHANGE, DEFAULT_HEARTBEAT_SECS};
pub use error::HubError;
pub use hub::{Channel, EventKind, Hub, HubEvent, HubState, Subscription, WeakHub};

/// Create a hub with the built-in adapters.
pub fn create(config: HubConfig, connector: std::sync::Arc<dyn Connector>) -> Hub {
    Hub::new(config, connector)
}
