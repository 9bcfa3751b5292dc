//! Adapters - protocol set-up for one hub role.
//!
//! A hub picks its adapter by task name from an [`AdapterRegistry`]. The
//! built-in registry knows:
//!
//! | task                    | adapter              |
//! |-------------------------|----------------------|
//! | `pub`, `publish`        | [`Publisher`]        |
//! | `subDurable`, `subscribe` | [`DurableSubscriber`] |
//!
//! Custom adapters are registered under new names:
//!
//! ```ignore
//! let mut registry = AdapterRegistry::default();
//! registry.register("audit", |_config| Box::new(AuditAdapter::default()));
//! let hub = Hub::with_registry(config, connector, registry);
//! ```

mod durable_subscriber;
mod publisher;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::HubConfig;
use crate::error::HubError;
use crate::hub::{Channel, Hub};

pub use durable_subscriber::DurableSubscriber;
pub use publisher::{Publisher, DEFAULT_ROUTING_KEY};

/// Protocol set-up for one hub role.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Declare what the role needs on the broker and wire the hub's events
    /// to it. Called once, after the connection is ready.
    async fn start(&mut self, hub: &Hub, channel: &Channel) -> Result<(), HubError>;

    /// Remove every listener `start` registered on the hub.
    fn detach(&mut self, _hub: &Hub) {}
}

/// Builds a fresh adapter for a hub.
pub type AdapterFactory = Arc<dyn Fn(&HubConfig) -> Box<dyn Adapter> + Send + Sync>;

/// Task name to adapter factory mapping.
#[derive(Clone)]
pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for name in ["pub", "publish"] {
            registry.register(name, |_| Box::new(Publisher::default()));
        }
        for name in ["subDurable", "subscribe"] {
            registry.register(name, |_| Box::new(DurableSubscriber::default()));
        }
        registry
    }
}

impl AdapterRegistry {
    /// A registry without any adapters.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&HubConfig) -> Box<dyn Adapter> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, name: &str, config: &HubConfig) -> Option<Box<dyn Adapter>> {
        self.factories.get(name).map(|factory| factory(config))
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}
