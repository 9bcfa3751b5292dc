use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::broker::BrokerError;
use crate::hub::HubState;

/// Error type for hub operations.
#[derive(Debug)]
pub enum HubError {
    /// The connection could not be opened, or failed after it was ready
    Connection(BrokerError),
    /// A suspending broker operation did not finish within the operation
    /// timeout
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    /// No adapter is registered under the configured task
    UnknownTask(String),
    /// The operation is not allowed in the hub's current state
    InvalidState {
        operation: &'static str,
        state: HubState,
    },
    /// The adapter could not finish its setup
    AdapterStart {
        task: String,
        source: Box<HubError>,
    },
    /// A broker command issued by a running adapter failed
    Broker(BrokerError),
    /// The option object could not be parsed
    Config(serde_json::Error),
}

impl HubError {
    /// Connection-level failures are fatal to the hub.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, HubError::Connection(_) | HubError::Timeout { .. })
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::Connection(e) => write!(f, "connection error: {}", e),
            HubError::Timeout { operation, after } => {
                write!(f, "{} timed out after {:?}", operation, after)
            }
            HubError::UnknownTask(task) => write!(f, "no adapter registered for task '{}'", task),
            HubError::InvalidState { operation, state } => {
                write!(f, "cannot {} while the hub is {}", operation, state)
            }
            HubError::AdapterStart { task, source } => {
                write!(f, "adapter '{}' failed to start: {}", task, source)
            }
            HubError::Broker(e) => write!(f, "broker command failed: {}", e),
            HubError::Config(e) => write!(f, "invalid hub options: {}", e),
        }
    }
}

impl Error for HubError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HubError::Connection(e) | HubError::Broker(e) => Some(e),
            HubError::AdapterStart { source, .. } => Some(source.as_ref()),
            HubError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::Config(e)
    }
}
