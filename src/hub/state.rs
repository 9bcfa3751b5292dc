use std::fmt;

/// Lifecycle of a [`Hub`](super::Hub).
///
/// ```text
/// Created -> Connecting -> Ready -> AdapterStarting -> Active -> Closed
///                 │          │             │             │
///                 └──────────┴─────────────┴─────────────┴──> Failed
/// ```
///
/// A hub never leaves `Closed` or `Failed`; reconnecting takes a new hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HubState {
    Created,
    Connecting,
    /// The connection is open, the adapter has not been started yet
    Ready,
    AdapterStarting,
    Active,
    Closed,
    Failed,
}

impl HubState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HubState::Closed | HubState::Failed)
    }
}

impl fmt::Display for HubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HubState::Created => "created",
            HubState::Connecting => "connecting",
            HubState::Ready => "ready",
            HubState::AdapterStarting => "adapter-starting",
            HubState::Active => "active",
            HubState::Closed => "closed",
            HubState::Failed => "failed",
        };
        f.write_str(name)
    }
}
