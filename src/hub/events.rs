//! Typed event dispatch for the hub.
//!
//! Listeners are kept per event kind in registration order. Emitting takes a
//! snapshot of the listener list and calls it without holding the lock, so a
//! listener may send, ack, end or (un)register listeners on the same hub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::Hub;
use crate::error::HubError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    Message,
    Ack,
    Close,
    Error,
}

/// An event as seen by listeners.
pub enum HubEvent<'a> {
    /// The hub is connected and its adapter is running
    Connection(&'a Hub),
    Message {
        payload: &'a str,
        routing_key: Option<&'a str>,
    },
    /// Request to acknowledge the oldest outstanding delivery
    Ack,
    Close,
    Error(&'a HubError),
}

impl HubEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            HubEvent::Connection(_) => EventKind::Connection,
            HubEvent::Message { .. } => EventKind::Message,
            HubEvent::Ack => EventKind::Ack,
            HubEvent::Close => EventKind::Close,
            HubEvent::Error(_) => EventKind::Error,
        }
    }
}

pub type Listener = Arc<dyn Fn(&HubEvent<'_>) + Send + Sync>;

/// Handle returned when registering a listener; pass it to
/// [`Hub::off`](super::Hub::off) to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

#[derive(Default)]
pub(crate) struct Dispatcher {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<(u64, Listener)>>>,
}

impl Dispatcher {
    pub(crate) fn add(&self, kind: EventKind, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, listener));
        Subscription { kind, id }
    }

    pub(crate) fn remove(&self, subscription: Subscription) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(&subscription.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        list.len() != before
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.listeners.lock().get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Call every listener registered for the event's kind, in registration
    /// order. Returns how many were called.
    pub(crate) fn emit(&self, event: &HubEvent<'_>) -> usize {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }
}
