//! Control-plane channel and worker subprocess for the directory agent relay
//!
//! Provides the two duplex JSON-document channels the relay bridges, each
//! behind a trait so the relay can be tested without a network or a process.
//!
//! # Architecture
//!
//! - **Channel traits**: [`Connector`] and [`Transport`] for the upstream connection
//! - **WebSocket transport**: [`WebSocketConnector`] via tokio-tungstenite
//! - **Worker trait**: [`Worker`], one request in flight at a time
//! - **Subprocess worker**: [`WorkerProcess`] over JSON document streams
//!   framed by [`JsonStreamCodec`]
//! - **Error handling**: [`TransportError`] (retryable) and [`WorkerError`] (fatal)
//!
//! # Usage
//!
//! ```ignore
//! use diragent_transport::{WorkerCommand, WorkerConfig, WorkerProcess, Worker};
//! use diragent_protocol::{Request, PingRequest};
//!
//! let mut worker = WorkerProcess::start(WorkerConfig::new(
//!     WorkerCommand::Shell("ldap-worker".into()),
//! )).await?;
//! let response = worker.round_trip(&Request::Ping(PingRequest {})).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod subprocess;
pub mod traits;
pub mod websocket;

// Re-export commonly used types
pub use error::{Result, TransportError, WorkerError};
pub use subprocess::{
    JsonStreamCodec, WORKER_ENV_VAR, WorkerCommand, WorkerConfig, WorkerProcess,
};
pub use traits::{Connector, Transport, Worker};
pub use websocket::{WebSocketConnector, WebSocketTransport};
