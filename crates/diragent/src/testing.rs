//! Testing utilities for relay tests
//!
//! Provides a scripted control-plane connector and an in-process worker so
//! the relay can be exercised without a network or a subprocess.

use crate::dispatcher::dispatch;
use crate::provider::Provider;
use async_trait::async_trait;
use diragent_protocol::{Request, Response};
use diragent_transport::{Connector, Transport, TransportError, Worker, WorkerError};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

enum Incoming {
    Document(Value),
    Fail(TransportError),
}

enum Script {
    Refuse(String),
    Accept(MockTransport),
}

/// Mock connector handing out scripted connection attempts in order
///
/// Once the script is exhausted, `connect` waits forever, so tests end by
/// cancelling the relay.
#[derive(Clone, Default)]
pub struct MockConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Create a connector with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next attempt fail
    pub async fn refuse(&self, message: impl Into<String>) {
        self.scripts
            .lock()
            .await
            .push_back(Script::Refuse(message.into()));
    }

    /// Make the next attempt succeed, returning the server's end of it
    pub async fn accept(&self) -> MockSession {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        self.scripts.lock().await.push_back(Script::Accept(MockTransport {
            incoming: incoming_rx,
            outgoing: outgoing_tx,
            closed: closed.clone(),
        }));

        MockSession {
            incoming: Some(incoming_tx),
            outgoing: outgoing_rx,
            closed,
        }
    }

    /// Number of `connect` calls so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> diragent_transport::Result<MockTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().await.pop_front();
        match next {
            Some(Script::Accept(transport)) => Ok(transport),
            Some(Script::Refuse(message)) => Err(TransportError::Connection(message)),
            None => std::future::pending().await,
        }
    }
}

/// The relay's end of a scripted connection
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    outgoing: mpsc::UnboundedSender<Value>,
    closed: CancellationToken,
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv(&mut self) -> diragent_transport::Result<Option<Value>> {
        match self.incoming.recv().await {
            Some(Incoming::Document(document)) => Ok(Some(document)),
            Some(Incoming::Fail(err)) => Err(err),
            None => Ok(None),
        }
    }

    async fn send(&mut self, document: Value) -> diragent_transport::Result<()> {
        self.outgoing
            .send(document)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> diragent_transport::Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

/// The server's end of a scripted connection
pub struct MockSession {
    incoming: Option<mpsc::UnboundedSender<Incoming>>,
    outgoing: mpsc::UnboundedReceiver<Value>,
    closed: CancellationToken,
}

impl MockSession {
    /// Deliver a raw document to the relay
    pub fn send(&self, document: Value) {
        if let Some(tx) = &self.incoming {
            let _ = tx.send(Incoming::Document(document));
        }
    }

    /// Deliver a request to the relay
    pub fn send_request(&self, request: &Request) {
        if let Ok(document) = request.to_value() {
            self.send(document);
        }
    }

    /// Make the relay's next read fail
    pub fn fail(&self, err: TransportError) {
        if let Some(tx) = &self.incoming {
            let _ = tx.send(Incoming::Fail(err));
        }
    }

    /// Close the server side; the relay reads end of stream
    pub fn hang_up(&mut self) {
        self.incoming = None;
    }

    /// Next document the relay sent
    pub async fn recv(&mut self) -> Option<Value> {
        self.outgoing.recv().await
    }

    /// Next document the relay sent, decoded as a response
    pub async fn recv_response(&mut self) -> Option<Response> {
        let document = self.recv().await?;
        Response::from_value(document).ok()
    }

    /// Whether the relay closed the connection cleanly
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

type ResponseOverride = Box<dyn Fn(&Request, Response) -> Response + Send + Sync>;

/// In-process worker that dispatches straight to a provider
pub struct LocalWorker<P: Provider> {
    provider: Arc<P>,
    exited: CancellationToken,
    terminated: CancellationToken,
    handled: Arc<AtomicUsize>,
    exit_after: Option<usize>,
    override_response: Option<ResponseOverride>,
}

impl<P: Provider> LocalWorker<P> {
    /// Create a worker over `provider`
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            exited: CancellationToken::new(),
            terminated: CancellationToken::new(),
            handled: Arc::new(AtomicUsize::new(0)),
            exit_after: None,
            override_response: None,
        }
    }

    /// Rewrite every response before it is returned
    pub fn with_override<F>(mut self, rewrite: F) -> Self
    where
        F: Fn(&Request, Response) -> Response + Send + Sync + 'static,
    {
        self.override_response = Some(Box::new(rewrite));
        self
    }

    /// Die after answering `n` requests
    ///
    /// The next request never gets a reply; the exit token is cancelled
    /// instead, as when a subprocess crashes mid-request.
    pub fn exit_after(mut self, n: usize) -> Self {
        self.exit_after = Some(n);
        self
    }

    /// Token that simulates the worker dying when cancelled
    pub fn exit_handle(&self) -> CancellationToken {
        self.exited.clone()
    }

    /// Token cancelled when the relay terminates the worker
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    /// Counter of requests answered so far
    pub fn handled(&self) -> Arc<AtomicUsize> {
        self.handled.clone()
    }
}

#[async_trait]
impl<P: Provider + 'static> Worker for LocalWorker<P> {
    async fn round_trip(&mut self, request: &Request) -> Result<Response, WorkerError> {
        if self.exited.is_cancelled() {
            return Err(WorkerError::Exited(None));
        }
        if self
            .exit_after
            .is_some_and(|n| self.handled.load(Ordering::SeqCst) >= n)
        {
            self.exited.cancel();
            return std::future::pending().await;
        }

        let response = dispatch(self.provider.as_ref(), request.clone()).await;
        self.handled.fetch_add(1, Ordering::SeqCst);

        Ok(match &self.override_response {
            Some(rewrite) => rewrite(request, response),
            None => response,
        })
    }

    fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }

    async fn terminate(&mut self) -> Result<(), WorkerError> {
        self.terminated.cancel();
        Ok(())
    }
}
