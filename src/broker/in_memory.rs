//! In-memory broker for testing and single-process scenarios.
//!
//! `MemoryBroker` implements [`Connector`] and hands out connections that
//! behave like an AMQP 0-9-1 broker as far as the hub cares:
//! - `amq.fanout`, `amq.topic` and `amq.direct` exist from the start
//! - durable queues survive the connections that declared them
//! - deliveries in ack mode are bounded by the consumer's prefetch and stay
//!   outstanding until acknowledged; unacked deliveries are requeued when the
//!   consumer's connection closes
//! - faults can be injected per operation, and every queue exposes its
//!   pending / outstanding / acknowledged counters for assertions

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;

use super::topic;
use super::{
    BrokerConnection, BrokerError, Connector, Consumer, Delivery, ErrorHandler, ExchangeKind,
    ExchangeOptions, QueueOptions, SubscribeOptions,
};

/// Broker operations that can be counted and faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    DeclareExchange,
    DeclareQueue,
    SubscribeQueue,
    DestroyQueue,
    BindQueue,
    Publish,
    AckOne,
    Close,
}

/// A queue binding as seen by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub routing_key: String,
}

/// A connection that was opened against the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub url: String,
    pub heartbeat: Duration,
}

enum Fault {
    Fail(String),
    Stall,
}

enum Gate {
    Open,
    Stalled,
}

struct Message {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

struct Outstanding {
    tag: u64,
    message: Message,
}

struct ConsumerState {
    connection: u64,
    options: SubscribeOptions,
    callback: Consumer,
    unacked: VecDeque<Outstanding>,
}

struct QueueState {
    durable: bool,
    auto_delete: bool,
    bindings: Vec<Binding>,
    ready: VecDeque<Message>,
    consumer: Option<ConsumerState>,
    delivered: u64,
    acknowledged: u64,
}

impl QueueState {
    fn new(durable: bool, auto_delete: bool) -> Self {
        Self {
            durable,
            auto_delete,
            bindings: Vec::new(),
            ready: VecDeque::new(),
            consumer: None,
            delivered: 0,
            acknowledged: 0,
        }
    }
}

struct LiveConnection {
    closed: Arc<AtomicBool>,
    error_handlers: Vec<ErrorHandler>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, (ExchangeKind, bool)>,
    queues: BTreeMap<String, QueueState>,
    connections: BTreeMap<u64, LiveConnection>,
    history: Vec<ConnectionInfo>,
    refusal: Option<String>,
    faults: HashMap<Operation, Fault>,
    calls: HashMap<Operation, usize>,
    next_connection: u64,
    next_queue: u64,
    next_tag: u64,
    /// Deliveries waiting to be handed to consumers outside the lock
    outbox: VecDeque<(Consumer, Delivery)>,
    dispatching: bool,
}

impl State {
    fn gate(&mut self, op: Operation) -> Result<Gate, BrokerError> {
        *self.calls.entry(op).or_default() += 1;
        match self.faults.get(&op) {
            None => Ok(Gate::Open),
            Some(Fault::Fail(reason)) => Err(BrokerError::other(reason.clone())),
            Some(Fault::Stall) => Ok(Gate::Stalled),
        }
    }

    fn declare_exchange(&mut self, options: ExchangeOptions) -> Result<String, BrokerError> {
        match self.exchanges.get(&options.name) {
            Some(_) if options.passive => Ok(options.name),
            None if options.passive => Err(BrokerError::NotFound(format!(
                "exchange '{}'",
                options.name
            ))),
            Some(&(kind, durable)) => {
                if kind != options.kind || durable != options.durable {
                    Err(BrokerError::PreconditionFailed(format!(
                        "exchange '{}' already declared as {} (durable: {})",
                        options.name, kind, durable
                    )))
                } else {
                    Ok(options.name)
                }
            }
            None if options.name.is_empty() => Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be declared".to_string(),
            )),
            None => {
                self.exchanges
                    .insert(options.name.clone(), (options.kind, options.durable));
                Ok(options.name)
            }
        }
    }

    fn declare_queue(&mut self, options: QueueOptions) -> Result<String, BrokerError> {
        let name = if options.name.is_empty() {
            self.next_queue += 1;
            format!("amq.gen-{}", self.next_queue)
        } else {
            options.name
        };

        match self.queues.get(&name) {
            Some(queue)
                if queue.durable != options.durable || queue.auto_delete != options.auto_delete =>
            {
                Err(BrokerError::PreconditionFailed(format!(
                    "queue '{}' already declared with durable: {}, auto_delete: {}",
                    name, queue.durable, queue.auto_delete
                )))
            }
            Some(_) => Ok(name),
            None => {
                self.queues.insert(
                    name.clone(),
                    QueueState::new(options.durable, options.auto_delete),
                );
                Ok(name)
            }
        }
    }

    fn queue_mut(&mut self, name: &str) -> Result<&mut QueueState, BrokerError> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{}'", name)))
    }

    fn subscribe(
        &mut self,
        connection: u64,
        queue_name: &str,
        options: SubscribeOptions,
        callback: Consumer,
    ) -> Result<(), BrokerError> {
        let queue = self.queue_mut(queue_name)?;
        if queue.consumer.is_some() {
            return Err(BrokerError::ResourceLocked(format!(
                "queue '{}' already has a consumer",
                queue_name
            )));
        }
        queue.consumer = Some(ConsumerState {
            connection,
            options,
            callback,
            unacked: VecDeque::new(),
        });
        self.drain(queue_name);
        Ok(())
    }

    fn bind(&mut self, queue_name: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        if !self.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotFound(format!("exchange '{}'", exchange)));
        }
        let queue = self.queue_mut(queue_name)?;
        let binding = Binding {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !queue.bindings.contains(&binding) {
            queue.bindings.push(binding);
        }
        Ok(())
    }

    fn route(&mut self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        let targets: Vec<String> = if exchange.is_empty() {
            // default exchange: the routing key names the queue
            self.queues
                .keys()
                .filter(|name| name.as_str() == routing_key)
                .cloned()
                .collect()
        } else {
            let (kind, _) = *self
                .exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::NotFound(format!("exchange '{}'", exchange)))?;
            self.queues
                .iter()
                .filter(|(_, queue)| {
                    queue.bindings.iter().any(|binding| {
                        binding.exchange == exchange
                            && binding_matches(kind, &binding.routing_key, routing_key)
                    })
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        if targets.is_empty() {
            debug!("unroutable message on '{}' with key '{}'", exchange, routing_key);
        }

        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.ready.push_back(Message {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body: body.to_vec(),
                    redelivered: false,
                });
            }
            self.drain(&name);
        }
        Ok(())
    }

    fn ack_one(&mut self, connection: u64, queue_name: &str) -> Result<(), BrokerError> {
        let queue = self.queue_mut(queue_name)?;
        let acked = match queue.consumer.as_mut() {
            Some(consumer) if consumer.connection == connection && consumer.options.ack => {
                consumer.unacked.pop_front()
            }
            _ => None,
        };
        match acked {
            Some(outstanding) => {
                queue.acknowledged += 1;
                debug!("acknowledged delivery {} on '{}'", outstanding.tag, queue_name);
                self.drain(queue_name);
            }
            None => debug!("nothing to acknowledge on '{}'", queue_name),
        }
        Ok(())
    }

    /// Move ready messages to the queue's consumer as far as its prefetch
    /// allows. Deliveries land in the outbox; callers pump it after
    /// releasing the lock.
    fn drain(&mut self, queue_name: &str) {
        let State {
            queues,
            next_tag,
            outbox,
            ..
        } = self;
        let Some(queue) = queues.get_mut(queue_name) else {
            return;
        };
        let Some(consumer) = queue.consumer.as_mut() else {
            return;
        };

        let limit = usize::from(consumer.options.prefetch.max(1));
        while !consumer.options.ack || consumer.unacked.len() < limit {
            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            *next_tag += 1;
            let delivery = Delivery {
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                body: message.body.clone(),
                delivery_tag: *next_tag,
                redelivered: message.redelivered,
            };
            if consumer.options.ack {
                consumer.unacked.push_back(Outstanding {
                    tag: *next_tag,
                    message,
                });
            }
            queue.delivered += 1;
            outbox.push_back((Arc::clone(&consumer.callback), delivery));
        }
    }

    /// Drop everything a connection held: its consumers go away, their
    /// unacked deliveries return to the front of the queue, and auto-delete
    /// queues left without a consumer are removed.
    fn disconnect(&mut self, connection: u64) -> Option<LiveConnection> {
        let live = self.connections.remove(&connection);
        let mut orphaned = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            let owned = matches!(&queue.consumer, Some(c) if c.connection == connection);
            if !owned {
                continue;
            }
            if let Some(consumer) = queue.consumer.take() {
                for mut outstanding in consumer.unacked.into_iter().rev() {
                    outstanding.message.redelivered = true;
                    queue.ready.push_front(outstanding.message);
                }
            }
            if queue.auto_delete {
                orphaned.push(name.clone());
            }
        }
        for name in orphaned {
            self.queues.remove(&name);
        }
        live
    }
}

fn binding_matches(kind: ExchangeKind, pattern: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Fanout => true,
        ExchangeKind::Direct => pattern == routing_key,
        ExchangeKind::Topic => topic::matches(pattern, routing_key),
    }
}

fn vhost_of(url: &str) -> String {
    let authority = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match authority.find('/') {
        Some(idx) => authority[idx..].to_string(),
        None => "/".to_string(),
    }
}

/// In-memory broker. Cheap to clone; clones share the same broker state.
///
/// ## Example
///
/// ```
/// use rabbit_hub::broker::{MemoryBroker, Operation};
///
/// let broker = MemoryBroker::new();
/// broker.create_queue("jobs");
/// broker.create_binding("jobs", "amq.topic", "job.#").unwrap();
/// broker.publish("amq.topic", "job.created", b"hello").unwrap();
///
/// assert_eq!(broker.pending("jobs"), 1);
/// assert_eq!(broker.calls(Operation::Connect), 0);
/// ```
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create a broker with the standard `amq.*` exchanges declared.
    pub fn new() -> Self {
        let mut state = State::default();
        for (name, kind) in [
            ("amq.fanout", ExchangeKind::Fanout),
            ("amq.topic", ExchangeKind::Topic),
            ("amq.direct", ExchangeKind::Direct),
        ] {
            state.exchanges.insert(name.to_string(), (kind, true));
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Refuse every new connection with `reason`.
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        self.state.lock().refusal = Some(reason.into());
    }

    pub fn accept_connections(&self) {
        self.state.lock().refusal = None;
    }

    /// Make every future `op` fail with `reason`.
    pub fn fail(&self, op: Operation, reason: impl Into<String>) {
        self.state.lock().faults.insert(op, Fault::Fail(reason.into()));
    }

    /// Make every future `op` suspend forever. Only the suspending
    /// operations (connect, declarations, subscribe, destroy) honour this.
    pub fn stall(&self, op: Operation) {
        self.state.lock().faults.insert(op, Fault::Stall);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Fail every live connection, as if the broker went away.
    pub fn sever(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let handlers: Vec<ErrorHandler> = {
            let mut state = self.state.lock();
            let ids: Vec<u64> = state.connections.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| state.disconnect(id))
                .flat_map(|live| {
                    live.closed.store(true, Ordering::SeqCst);
                    live.error_handlers
                })
                .collect()
        };
        let error = BrokerError::ConnectionLost(reason);
        for handler in handlers {
            handler(&error);
        }
    }

    /// Declare a durable queue without going through a connection.
    pub fn create_queue(&self, name: &str) {
        let mut state = self.state.lock();
        if !state.queues.contains_key(name) {
            state
                .queues
                .insert(name.to_string(), QueueState::new(true, false));
        }
    }

    pub fn create_binding(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.state.lock().bind(queue, exchange, routing_key)
    }

    /// Publish without going through a connection.
    pub fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.state.lock().route(exchange, routing_key, body)?;
        self.pump();
        Ok(())
    }

    /// Put a message straight onto a queue, bypassing exchanges.
    pub fn enqueue(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock();
            state.queue_mut(queue)?.ready.push_back(Message {
                exchange: String::new(),
                routing_key: queue.to_string(),
                body: body.to_vec(),
                redelivered: false,
            });
            state.drain(queue);
        }
        self.pump();
        Ok(())
    }

    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        self.state.lock().exchanges.get(name).map(|(kind, _)| *kind)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state.lock().queues.contains_key(name)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.state.lock().queues.keys().cloned().collect()
    }

    pub fn bindings(&self, queue: &str) -> Vec<Binding> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.bindings.clone())
            .unwrap_or_default()
    }

    pub fn has_consumer(&self, queue: &str) -> bool {
        self.with_queue(queue, |q| q.consumer.is_some())
    }

    /// Messages waiting on the queue that were not handed to a consumer.
    pub fn pending(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.ready.len())
    }

    /// Delivered messages awaiting acknowledgment.
    pub fn outstanding(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| {
            q.consumer.as_ref().map(|c| c.unacked.len()).unwrap_or(0)
        })
    }

    pub fn delivered(&self, queue: &str) -> u64 {
        self.with_queue(queue, |q| q.delivered)
    }

    pub fn acknowledged(&self, queue: &str) -> u64 {
        self.with_queue(queue, |q| q.acknowledged)
    }

    /// How many times `op` was attempted.
    pub fn calls(&self, op: Operation) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Every connection ever opened, in order.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.state.lock().history.clone()
    }

    pub fn live_connections(&self) -> usize {
        self.state.lock().connections.len()
    }

    fn with_queue<T: Default>(&self, name: &str, f: impl FnOnce(&QueueState) -> T) -> T {
        self.state.lock().queues.get(name).map(f).unwrap_or_default()
    }

    /// Hand queued deliveries to their consumers, in order, without holding
    /// the lock. Re-entrant calls from inside a consumer only enqueue; the
    /// outermost pump delivers.
    fn pump(&self) {
        {
            let mut state = self.state.lock();
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }
        loop {
            let next = {
                let mut state = self.state.lock();
                let next = state.outbox.pop_front();
                if next.is_none() {
                    state.dispatching = false;
                }
                next
            };
            match next {
                Some((consumer, delivery)) => consumer(delivery),
                None => break,
            }
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(
        &self,
        url: &str,
        heartbeat: Duration,
    ) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let gate = {
            let mut state = self.state.lock();
            if let Some(reason) = &state.refusal {
                return Err(BrokerError::ConnectionRefused(reason.clone()));
            }
            state
                .gate(Operation::Connect)
                .map_err(|e| BrokerError::ConnectionRefused(e.to_string()))?
        };
        if let Gate::Stalled = gate {
            future::pending::<()>().await;
        }

        let closed = Arc::new(AtomicBool::new(false));
        let id = {
            let mut state = self.state.lock();
            state.next_connection += 1;
            let id = state.next_connection;
            state.history.push(ConnectionInfo {
                id,
                url: url.to_string(),
                heartbeat,
            });
            state.connections.insert(
                id,
                LiveConnection {
                    closed: Arc::clone(&closed),
                    error_handlers: Vec::new(),
                },
            );
            id
        };
        debug!("memory broker accepted connection {} to {}", id, url);

        Ok(Arc::new(MemoryConnection {
            broker: self.clone(),
            id,
            vhost: vhost_of(url),
            closed,
        }))
    }
}

/// Connection handed out by [`MemoryBroker`].
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
    vhost: String,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    fn gate(&self, op: Operation) -> Result<Gate, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }
        self.broker.state.lock().gate(op)
    }

    async fn enter(&self, op: Operation) -> Result<(), BrokerError> {
        match self.gate(op)? {
            Gate::Open => Ok(()),
            Gate::Stalled => future::pending().await,
        }
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn vhost(&self) -> String {
        self.vhost.clone()
    }

    async fn declare_exchange(&self, options: ExchangeOptions) -> Result<String, BrokerError> {
        self.enter(Operation::DeclareExchange).await?;
        self.broker.state.lock().declare_exchange(options)
    }

    async fn declare_queue(&self, options: QueueOptions) -> Result<String, BrokerError> {
        self.enter(Operation::DeclareQueue).await?;
        self.broker.state.lock().declare_queue(options)
    }

    async fn subscribe_queue(
        &self,
        queue: &str,
        options: SubscribeOptions,
        consumer: Consumer,
    ) -> Result<(), BrokerError> {
        self.enter(Operation::SubscribeQueue).await?;
        self.broker
            .state
            .lock()
            .subscribe(self.id, queue, options, consumer)?;
        self.broker.pump();
        Ok(())
    }

    async fn destroy_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.enter(Operation::DestroyQueue).await?;
        if self.broker.state.lock().queues.remove(queue).is_some() {
            debug!("memory broker destroyed queue '{}'", queue);
        }
        Ok(())
    }

    fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.gate(Operation::BindQueue)?;
        self.broker.state.lock().bind(queue, exchange, routing_key)
    }

    fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), BrokerError> {
        self.gate(Operation::Publish)?;
        self.broker.state.lock().route(exchange, routing_key, body)?;
        self.broker.pump();
        Ok(())
    }

    fn ack_one(&self, queue: &str) -> Result<(), BrokerError> {
        self.gate(Operation::AckOne)?;
        self.broker.state.lock().ack_one(self.id, queue)?;
        self.broker.pump();
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }
        let result = {
            let mut state = self.broker.state.lock();
            let result = match state.gate(Operation::Close) {
                Err(e) => Err(e),
                Ok(_) => Ok(()),
            };
            state.disconnect(self.id);
            result
        };
        self.broker.pump();
        result
    }

    fn on_error(&self, handler: ErrorHandler) {
        if let Some(live) = self.broker.state.lock().connections.get_mut(&self.id) {
            live.error_handlers.push(handler);
        }
    }
}
