//! Error types for the relay
//!
//! Provides self-documenting errors with recovery guidance.
//! Errors implement the `ErrorRecovery` trait, which answers two questions:
//! - Retriability (does the relay handle this by reconnecting?)
//! - Suggested operator action (what should be fixed?)

use diragent_transport::{TransportError, WorkerError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error recovery guidance trait
///
/// Errors implement this trait to provide actionable recovery guidance.
pub trait ErrorRecovery {
    /// Whether this error is recovered from by retrying
    fn is_retriable(&self) -> bool;

    /// Operator-facing action to take
    fn suggested_action(&self) -> &'static str;
}

/// Errors that end or interrupt the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// The control-plane channel failed; the relay reconnects
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The worker failed; the relay stops
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    /// The relay was started with an unusable configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ErrorRecovery for RelayError {
    fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Worker(_) => false,
            Self::Config(err) => err.is_retriable(),
        }
    }

    fn suggested_action(&self) -> &'static str {
        match self {
            Self::Transport(TransportError::InvalidUrl(_)) => {
                "Server URL is not usable. Use an http(s) or ws(s) URL."
            }
            Self::Transport(_) => {
                "Connection to the server lost. The relay reconnects automatically; \
                check network access and the agent token if it keeps failing."
            }
            Self::Worker(WorkerError::Spawn(_)) => {
                "Worker command could not be started. Check the command path and permissions."
            }
            Self::Worker(WorkerError::Handshake(_)) => {
                "Worker rejected its configuration. Check the directory credentials and \
                parameters passed to the worker."
            }
            Self::Worker(err) if err.is_exit() => {
                "Worker exited unexpectedly. Check the worker's diagnostic output; the relay \
                does not restart it."
            }
            Self::Worker(WorkerError::Timeout(_)) => {
                "Worker stopped responding. Check the directory backend's health or raise \
                the request timeout."
            }
            Self::Worker(_) => {
                "Worker failed. Check the worker's diagnostic output; restart the relay \
                once it is fixed."
            }
            Self::Config(err) => err.suggested_action(),
        }
    }
}

/// Configuration problems found before the relay starts
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No control-plane URL was given
    #[error("server URL is required (--server or DIRAGENT_SERVER)")]
    MissingServer,

    /// No agent token was given
    #[error("agent token is required (--agent-token or DIRAGENT_AGENT_TOKEN)")]
    MissingToken,

    /// No worker command was given
    #[error("worker command is required (--command)")]
    MissingCommand,

    /// A value is present but unusable
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A configuration or fixture file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid TOML for this schema
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl ErrorRecovery for ConfigError {
    fn is_retriable(&self) -> bool {
        false
    }

    fn suggested_action(&self) -> &'static str {
        match self {
            Self::MissingServer | Self::MissingToken | Self::MissingCommand => {
                "Supply the missing setting on the command line, in the environment, \
                or in the configuration file."
            }
            Self::Invalid { .. } => "Correct the setting and restart the relay.",
            Self::Io { .. } => "Check that the file exists and is readable.",
            Self::Parse { .. } => "Fix the syntax error in the configuration file.",
        }
    }
}
