use std::error::Error;
use std::fmt;

/// Error type for broker transport operations.
#[derive(Debug)]
pub enum BrokerError {
    /// The broker could not be reached or refused the connection
    ConnectionRefused(String),
    /// The connection was already closed when the operation was issued
    ConnectionClosed,
    /// An established connection failed
    ConnectionLost(String),
    /// A passive lookup or a reference named an entity that does not exist
    NotFound(String),
    /// An entity was redeclared with incompatible properties
    PreconditionFailed(String),
    /// An exclusive consumer already holds the queue
    ResourceLocked(String),
    /// Other error
    Other(Box<dyn Error + Send + Sync>),
}

impl BrokerError {
    pub fn other(message: impl Into<String>) -> Self {
        BrokerError::Other(message.into().into())
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionRefused(msg) => write!(f, "connection refused: {}", msg),
            BrokerError::ConnectionClosed => write!(f, "connection already closed"),
            BrokerError::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            BrokerError::NotFound(what) => write!(f, "not found: {}", what),
            BrokerError::PreconditionFailed(msg) => write!(f, "precondition failed: {}", msg),
            BrokerError::ResourceLocked(what) => write!(f, "resource locked: {}", what),
            BrokerError::Other(e) => write!(f, "broker error: {}", e),
        }
    }
}

impl Error for BrokerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BrokerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
