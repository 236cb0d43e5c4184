//! Transport and worker error types
//!
//! The two enums mirror the relay's failure taxonomy: a [`TransportError`]
//! is network-level and answered by reconnecting, a [`WorkerError`] means the
//! local subprocess can no longer be trusted and ends the relay.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

/// Result type for control-plane channel operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors on the control-plane channel. All of them are retryable.
#[derive(Debug)]
pub enum TransportError {
    /// The server URL cannot be turned into a websocket endpoint
    InvalidUrl(String),

    /// Handshake, authentication, or TLS failure while connecting
    Connection(String),

    /// The websocket failed after it was established
    WebSocket(String),

    /// A frame did not carry a JSON document
    Serialization(String),

    /// I/O error
    Io(std::io::Error),

    /// The peer closed the connection
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(msg) => write!(f, "Invalid server URL: {}", msg),
            Self::Connection(msg) => write!(f, "Connection error: {}", msg),
            Self::WebSocket(msg) => write!(f, "WebSocket error: {}", msg),
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            WsError::Io(io) => Self::Io(io),
            other => Self::WebSocket(other.to_string()),
        }
    }
}

/// Errors from the worker subprocess. None of them are retryable.
#[derive(Debug)]
pub enum WorkerError {
    /// The subprocess could not be started
    Spawn(std::io::Error),

    /// The startup `configure` exchange failed
    Handshake(String),

    /// Reading from or writing to the subprocess pipes failed
    Io(std::io::Error),

    /// The subprocess wrote something that is not a valid response
    Protocol(String),

    /// The subprocess exited or closed its output
    Exited(Option<ExitStatus>),

    /// The subprocess did not answer within the configured limit
    Timeout(Duration),
}

impl WorkerError {
    /// True when the error reports the subprocess going away
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exited(_))
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "Failed to spawn worker: {}", err),
            Self::Handshake(msg) => write!(f, "Worker handshake failed: {}", msg),
            Self::Io(err) => write!(f, "Worker I/O error: {}", err),
            Self::Protocol(msg) => write!(f, "Worker protocol violation: {}", msg),
            Self::Exited(Some(status)) => write!(f, "Worker exited ({})", status),
            Self::Exited(None) => write!(f, "Worker exited"),
            Self::Timeout(limit) => write!(f, "Worker did not respond within {:?}", limit),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) | Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<diragent_protocol::ProtocolError> for WorkerError {
    fn from(err: diragent_protocol::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
