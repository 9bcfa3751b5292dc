use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::time;

use super::events::{Dispatcher, EventKind, HubEvent, Listener, Subscription};
use super::{Channel, HubState};
use crate::adapter::{Adapter, AdapterRegistry};
use crate::broker::{BrokerConnection, BrokerError, Connector};
use crate::config::{ErrorMode, HubConfig};
use crate::error::HubError;

struct Inner {
    config: HubConfig,
    connector: Arc<dyn Connector>,
    registry: AdapterRegistry,
    state: Mutex<HubState>,
    connection: Mutex<Option<Arc<dyn BrokerConnection>>>,
    adapter: Mutex<Option<Box<dyn Adapter>>>,
    events: Dispatcher,
    /// Inbound messages relayed before the hub became active
    backlog: Mutex<VecDeque<String>>,
    relaying: AtomicBool,
}

/// A publisher or durable subscriber against a broker exchange.
///
/// The hub owns the broker connection and the adapter selected by the
/// configured task. Owners talk to it through `send` / `ack` / `end` and
/// listen for `connection`, `message`, `ack`, `close` and `error` events.
/// Cheap to clone; clones are the same hub.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use rabbit_hub::{Hub, HubConfig};
/// use rabbit_hub::broker::MemoryBroker;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let broker = MemoryBroker::new();
/// let hub = Hub::new(
///     HubConfig::new("subDurable").with_channel("orders").with_queue_name("billing"),
///     Arc::new(broker.clone()),
/// );
///
/// hub.on_connection(|hub| {
///     hub.on_message(|msg, _| println!("received {}", msg));
/// });
/// hub.connect().await.unwrap();
///
/// broker.publish("orders", "order.created", b"hello").unwrap();
/// hub.end();
/// # });
/// ```
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

/// Non-owning handle to a hub, used by callbacks the connection keeps alive.
#[derive(Clone)]
pub struct WeakHub {
    inner: Weak<Inner>,
}

impl WeakHub {
    pub fn upgrade(&self) -> Option<Hub> {
        self.inner.upgrade().map(|inner| Hub { inner })
    }
}

impl Hub {
    /// Create a hub with the built-in adapters.
    pub fn new(config: HubConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_registry(config, connector, AdapterRegistry::default())
    }

    pub fn with_registry(
        config: HubConfig,
        connector: Arc<dyn Connector>,
        registry: AdapterRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                registry,
                state: Mutex::new(HubState::Created),
                connection: Mutex::new(None),
                adapter: Mutex::new(None),
                events: Dispatcher::default(),
                backlog: Mutex::new(VecDeque::new()),
                relaying: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn state(&self) -> HubState {
        *self.inner.state.lock()
    }

    /// The connection is present from `Ready` until `end` or a failure.
    pub fn is_connected(&self) -> bool {
        self.inner.connection.lock().is_some()
    }

    pub fn downgrade(&self) -> WeakHub {
        WeakHub {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Open the connection and start the adapter.
    ///
    /// Accepted once per hub. On success the hub is `Active` and the
    /// `connection` event has fired. Connection failures and timeouts leave
    /// the hub `Failed` and are returned as well as emitted as `error`.
    /// Adapter failures follow the configured [`ErrorMode`]: lenient hubs
    /// emit `error` and still become active, strict hubs fail.
    pub async fn connect(&self) -> Result<(), HubError> {
        self.advance(HubState::Created, HubState::Connecting, "connect")?;

        let config = &self.inner.config;
        let timeout = config.operation_timeout();
        info!("hub '{}' connecting to {}", config.task, config.redacted_url());

        let opened = time::timeout(
            timeout,
            self.inner.connector.connect(&config.url(), config.heartbeat()),
        )
        .await;
        let connection = match opened {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(self.fail(HubError::Connection(e))),
            Err(_) => {
                return Err(self.fail(HubError::Timeout {
                    operation: "connect",
                    after: timeout,
                }))
            }
        };

        let weak = self.downgrade();
        connection.on_error(Arc::new(move |e: &BrokerError| {
            if let Some(hub) = weak.upgrade() {
                hub.connection_failed(e);
            }
        }));
        *self.inner.connection.lock() = Some(Arc::clone(&connection));
        if let Err(e) = self.advance(HubState::Connecting, HubState::Ready, "connect") {
            // ended while the connection was opening
            self.release_connection();
            return Err(e);
        }
        debug!("hub '{}' ready", config.task);

        let channel = Channel::new(connection, timeout);
        if config.clean {
            if let Err(e) = self.clean_queue(&channel).await {
                return Err(self.fail(e));
            }
        }
        self.start_adapter(&channel).await
    }

    /// Declare and destroy the configured queue so the adapter starts from
    /// an empty queue with no bindings.
    async fn clean_queue(&self, channel: &Channel) -> Result<(), HubError> {
        let config = &self.inner.config;
        let Some(name) = config.queue_name.as_deref().filter(|n| !n.is_empty()) else {
            warn!("clean start requested without a queue name, skipping");
            return Ok(());
        };
        let queue = channel.declare_queue(config.queue()).await?;
        channel.destroy_queue(&queue).await?;
        info!("destroyed queue '{}' before start", name);
        Ok(())
    }

    async fn start_adapter(&self, channel: &Channel) -> Result<(), HubError> {
        let config = &self.inner.config;
        let task = config.task.as_str();
        let Some(mut adapter) = self.inner.registry.create(task, config) else {
            return Err(self.fail(HubError::UnknownTask(task.to_string())));
        };
        self.advance(HubState::Ready, HubState::AdapterStarting, "start adapter")?;

        let started = adapter.start(self, channel).await;
        *self.inner.adapter.lock() = Some(adapter);

        match started {
            Ok(()) => {}
            Err(e) if e.is_connection_error() => return Err(self.fail(e)),
            Err(e) => {
                let e = HubError::AdapterStart {
                    task: task.to_string(),
                    source: Box::new(e),
                };
                match config.error_mode() {
                    ErrorMode::Lenient => {
                        warn!("{}, continuing", e);
                        self.inner.events.emit(&HubEvent::Error(&e));
                    }
                    ErrorMode::Strict => return Err(self.fail(e)),
                }
            }
        }

        if let Err(e) = self.advance(HubState::AdapterStarting, HubState::Active, "start adapter") {
            // ended or failed while the adapter was starting
            self.detach_adapter();
            return Err(e);
        }
        info!("hub '{}' active", task);
        self.inner.events.emit(&HubEvent::Connection(self));
        self.open_relay();
        Ok(())
    }

    /// Emit `message` with the given payload and routing key to every
    /// listener, synchronously and in registration order.
    pub fn send(&self, message: &str, routing_key: Option<&str>) {
        self.inner.events.emit(&HubEvent::Message {
            payload: message,
            routing_key,
        });
    }

    /// Relay an inbound message. Messages arriving before the hub is active
    /// are held back and sent, in order, right after `connection` fires.
    pub fn relay(&self, message: String) {
        {
            let mut backlog = self.inner.backlog.lock();
            if !self.inner.relaying.load(Ordering::SeqCst) {
                backlog.push_back(message);
                return;
            }
        }
        self.send(&message, None);
    }

    fn open_relay(&self) {
        loop {
            let next = {
                let mut backlog = self.inner.backlog.lock();
                let next = backlog.pop_front();
                if next.is_none() {
                    self.inner.relaying.store(true, Ordering::SeqCst);
                }
                next
            };
            match next {
                Some(message) => self.send(&message, None),
                None => break,
            }
        }
    }

    /// Ask the adapter to acknowledge the oldest outstanding delivery. Only
    /// has an effect on a subscriber hub in ack mode.
    pub fn ack(&self) {
        self.inner.events.emit(&HubEvent::Ack);
    }

    /// Close the connection and emit `close`.
    ///
    /// Close errors are logged and swallowed. Calling `end` again is a no-op.
    pub fn end(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == HubState::Closed {
                debug!("hub '{}' already closed", self.inner.config.task);
                return;
            }
            *state = HubState::Closed;
        }

        self.detach_adapter();
        self.inner.backlog.lock().clear();
        self.release_connection();
        info!("hub '{}' closed", self.inner.config.task);
        self.inner.events.emit(&HubEvent::Close);
    }

    /// Emit an error raised while the hub is running (publish or ack
    /// failures). Does not change the hub's state.
    pub fn report(&self, e: HubError) {
        warn!("hub '{}': {}", self.inner.config.task, e);
        self.inner.events.emit(&HubEvent::Error(&e));
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&HubEvent<'_>) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        self.inner.events.add(kind, listener)
    }

    pub fn on_connection<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Hub) + Send + Sync + 'static,
    {
        self.on(EventKind::Connection, move |event| {
            if let HubEvent::Connection(hub) = event {
                listener(hub);
            }
        })
    }

    pub fn on_message<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str, Option<&str>) + Send + Sync + 'static,
    {
        self.on(EventKind::Message, move |event| {
            if let HubEvent::Message {
                payload,
                routing_key,
            } = event
            {
                listener(payload, *routing_key);
            }
        })
    }

    pub fn on_ack<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Ack, move |_| listener())
    }

    pub fn on_close<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Close, move |_| listener())
    }

    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&HubError) + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| {
            if let HubEvent::Error(e) = event {
                listener(e);
            }
        })
    }

    /// Unregister a listener. Returns false if it was already removed.
    pub fn off(&self, subscription: Subscription) -> bool {
        self.inner.events.remove(subscription)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.events.count(kind)
    }

    fn advance(
        &self,
        from: HubState,
        to: HubState,
        operation: &'static str,
    ) -> Result<(), HubError> {
        let mut state = self.inner.state.lock();
        if *state != from {
            return Err(HubError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    /// Mark the hub failed, drop its connection, and emit `error`.
    fn fail(&self, e: HubError) -> HubError {
        error!("hub '{}' failed: {}", self.inner.config.task, e);
        {
            let mut state = self.inner.state.lock();
            if *state != HubState::Closed {
                *state = HubState::Failed;
            }
        }
        self.detach_adapter();
        self.inner.backlog.lock().clear();
        self.release_connection();
        self.inner.events.emit(&HubEvent::Error(&e));
        e
    }

    fn connection_failed(&self, cause: &BrokerError) {
        let reason = match cause {
            BrokerError::ConnectionLost(reason) => reason.clone(),
            other => other.to_string(),
        };
        let e = HubError::Connection(BrokerError::ConnectionLost(reason));
        error!("hub '{}' connection error: {}", self.inner.config.task, e);
        {
            let mut state = self.inner.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = HubState::Failed;
        }
        self.detach_adapter();
        self.inner.backlog.lock().clear();
        self.inner.connection.lock().take();
        self.inner.events.emit(&HubEvent::Error(&e));
    }

    /// Unwire the adapter's listeners so nothing reaches a dead connection.
    fn detach_adapter(&self) {
        let adapter = self.inner.adapter.lock().take();
        if let Some(mut adapter) = adapter {
            adapter.detach(self);
        }
    }

    fn release_connection(&self) {
        let connection = self.inner.connection.lock().take();
        if let Some(connection) = connection {
            if let Err(e) = connection.close() {
                warn!("error closing connection: {}", e);
            }
        }
    }
}
