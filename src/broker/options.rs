//! Argument and payload types shared by every broker transport.

use std::fmt;
use std::sync::Arc;

use super::BrokerError;

/// Routing behaviour of an exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Every bound queue receives every message
    Fanout,
    /// Routing keys are matched against `*` / `#` binding patterns
    Topic,
    /// Routing keys must equal the binding key
    Direct,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Fanout => f.write_str("fanout"),
            ExchangeKind::Topic => f.write_str("topic"),
            ExchangeKind::Direct => f.write_str("direct"),
        }
    }
}

/// Arguments for declaring (or passively looking up) an exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    /// Only look the exchange up; fail if it does not exist
    pub passive: bool,
}

impl ExchangeOptions {
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: false,
            passive: false,
        }
    }

    /// Look up an existing exchange without declaring it.
    pub fn passive(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            passive: true,
            ..Self::new(name, kind)
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }
}

/// Arguments for declaring a queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue name; empty asks the broker to generate one
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
}

impl QueueOptions {
    /// A durable queue that outlives its consumers.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            auto_delete: false,
        }
    }
}

/// Consumer settings for a queue subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Deliveries stay outstanding until acknowledged
    pub ack: bool,
    /// Refuse any other consumer on the same queue
    pub exclusive: bool,
    /// Maximum outstanding deliveries in ack mode
    pub prefetch: u16,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            ack: false,
            exclusive: false,
            prefetch: 1,
        }
    }
}

/// A message handed to a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    /// The message was delivered before and never acknowledged
    pub redelivered: bool,
}

impl Delivery {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Callback invoked for every message delivered to a subscription.
pub type Consumer = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Callback invoked when an established connection fails.
pub type ErrorHandler = Arc<dyn Fn(&BrokerError) + Send + Sync>;
