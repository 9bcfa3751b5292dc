//! The hub - connection lifecycle, adapter start-up and event relay.
//!
//! ```text
//! owner ──connect()──▶ Hub ──connect(url, heartbeat)──▶ Connector
//!                       │ ready
//!                       ├─ clean start: declare + destroy queue
//!                       ├─ AdapterRegistry[task].start(hub, channel)
//!                       └─ emit connection(hub)
//!
//! broker ──delivery──▶ Adapter ──relay──▶ Hub ──message──▶ listeners
//! owner  ──send/ack──▶ Hub ──message/ack──▶ Adapter ──▶ BrokerConnection
//! owner  ──end()─────▶ Hub ──close──▶ BrokerConnection, emit close
//! ```

mod channel;
mod events;
mod hub;
mod state;

pub use channel::Channel;
pub use events::{EventKind, HubEvent, Listener, Subscription};
pub use hub::{Hub, WeakHub};
pub use state::HubState;
