//! Channel and worker traits
//!
//! The relay is written against these traits rather than the concrete
//! websocket and subprocess types, so it can be driven by in-memory doubles.

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use diragent_protocol::{Request, Response};
use tokio_util::sync::CancellationToken;

/// One established connection to the control plane
///
/// Messages are delivered in send order. Nothing carries over between
/// connections: a request in flight when the channel drops is lost.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next JSON document
    ///
    /// Returns `Ok(None)` when the peer closed the connection in an orderly way.
    async fn recv(&mut self) -> Result<Option<serde_json::Value>>;

    /// Send one JSON document
    ///
    /// `&mut self` keeps a single writer per connection.
    async fn send(&mut self, document: serde_json::Value) -> Result<()>;

    /// Close the connection cleanly
    async fn close(&mut self) -> Result<()>;
}

/// Produces fresh [`Transport`]s, one per connection attempt
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connection type
    type Transport: Transport;

    /// Open a new connection
    ///
    /// Fails with a connection error on handshake, authentication, or TLS failure.
    async fn connect(&self) -> Result<Self::Transport>;
}

/// A request/response peer that executes provider operations
///
/// Exactly one request is in flight at a time; `&mut self` on
/// [`round_trip`](Self::round_trip) makes that structural.
#[async_trait]
pub trait Worker: Send {
    /// Send one request and wait for its response
    async fn round_trip(&mut self, request: &Request) -> std::result::Result<Response, WorkerError>;

    /// Token cancelled when the worker goes away on its own
    fn exited(&self) -> CancellationToken;

    /// How the worker exited, once it has
    fn exit_status(&self) -> Option<std::process::ExitStatus> {
        None
    }

    /// Stop the worker
    async fn terminate(&mut self) -> std::result::Result<(), WorkerError>;
}
