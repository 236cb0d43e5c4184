//! Relay loop
//!
//! Bridges one control-plane connection at a time to a long-lived worker.
//! The connection is re-established with backoff whenever it fails; the
//! worker is started once and a worker failure ends the relay.
//!
//! ```text
//! Disconnected -> Connecting -> Forwarding -> Disconnected (transport failure)
//!                                          -> Draining     (shutdown or worker failure)
//! ```

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use diragent_core::retry::{BackoffSchedule, ExponentialBackoff};
use diragent_protocol::{Request, Response};
use diragent_transport::{Connector, Transport, TransportError, Worker, WorkerError};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a clean close of the connection may take during shutdown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the relay is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting to (re)connect
    Disconnected,
    /// Dialing the control plane
    Connecting,
    /// Relaying requests and responses
    Forwarding,
    /// Shutting down
    Draining,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Forwarding => "forwarding",
            Self::Draining => "draining",
        })
    }
}

/// Tuning for [`Relay`]
#[derive(Debug, Clone, Default)]
pub struct RelayOptions {
    /// Reconnect delays
    pub backoff: ExponentialBackoff,
}

impl From<&RelayConfig> for RelayOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            backoff: config.backoff(),
        }
    }
}

/// How a forwarding session ended
enum Session {
    Shutdown,
    Dropped(TransportError),
    WorkerFailed(WorkerError),
}

/// Outcome of racing an operation against shutdown and worker exit
enum Raced<T> {
    Done(T),
    Shutdown,
    WorkerExited,
}

/// The relay between the control plane and a worker
pub struct Relay<C: Connector, W: Worker> {
    connector: C,
    worker: W,
    schedule: BackoffSchedule,
    shutdown: CancellationToken,
    worker_exited: CancellationToken,
    state: RelayState,
}

impl<C: Connector, W: Worker> Relay<C, W> {
    /// Create a relay over a started worker
    ///
    /// Cancelling `shutdown` makes [`run`](Self::run) return `Ok(())`.
    pub fn new(connector: C, worker: W, options: RelayOptions, shutdown: CancellationToken) -> Self {
        let worker_exited = worker.exited();
        Self {
            connector,
            worker,
            schedule: BackoffSchedule::new(options.backoff),
            shutdown,
            worker_exited,
            state: RelayState::Disconnected,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Relay until shutdown or a fatal worker condition
    ///
    /// The worker is terminated before this returns, whatever the outcome.
    pub async fn run(&mut self) -> Result<()> {
        let outcome = self.serve().await;
        self.transition(RelayState::Draining);

        if let Err(err) = self.worker.terminate().await {
            warn!(error = %err, "failed to stop worker");
        }
        match &outcome {
            Ok(()) => info!("relay stopped"),
            Err(err) => error!(error = %err, "relay failed"),
        }
        outcome
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            self.transition(RelayState::Connecting);
            let shutdown = self.shutdown.clone();
            let exited = self.worker_exited.clone();

            match race(&shutdown, &exited, self.connector.connect()).await {
                Raced::Shutdown => return Ok(()),
                Raced::WorkerExited => return Err(self.worker_gone()),
                Raced::Done(Err(err)) => {
                    warn!(error = %err, attempt = self.schedule.attempt() + 1, "connect failed");
                }
                Raced::Done(Ok(mut transport)) => {
                    self.transition(RelayState::Forwarding);
                    let started = Instant::now();
                    let session = self.forward(&mut transport).await;
                    let healthy = started.elapsed();

                    match session {
                        Session::Shutdown => {
                            close(&mut transport).await;
                            return Ok(());
                        }
                        Session::WorkerFailed(err) => {
                            close(&mut transport).await;
                            return Err(err.into());
                        }
                        Session::Dropped(TransportError::Closed) => {
                            info!(session = ?healthy, "server closed the connection");
                        }
                        Session::Dropped(err) => {
                            warn!(error = %err, session = ?healthy, "connection lost");
                        }
                    }
                    if self.schedule.record_session(healthy) {
                        debug!("long session, backoff reset");
                    }
                }
            }

            self.transition(RelayState::Disconnected);
            let delay = self.schedule.next_delay();
            info!(delay = ?delay, attempt = self.schedule.attempt(), "reconnecting");
            match race(&shutdown, &exited, tokio::time::sleep(delay)).await {
                Raced::Shutdown => return Ok(()),
                Raced::WorkerExited => return Err(self.worker_gone()),
                Raced::Done(()) => {}
            }
        }
    }

    async fn forward<T: Transport>(&mut self, transport: &mut T) -> Session {
        let shutdown = self.shutdown.clone();
        let exited = self.worker_exited.clone();

        loop {
            let document = match race(&shutdown, &exited, transport.recv()).await {
                Raced::Shutdown => return Session::Shutdown,
                Raced::WorkerExited => return Session::WorkerFailed(self.exit_error()),
                Raced::Done(Ok(Some(document))) => document,
                Raced::Done(Ok(None)) => return Session::Dropped(TransportError::Closed),
                Raced::Done(Err(err)) => return Session::Dropped(err),
            };

            let response = match Request::from_value(document) {
                Ok(request) => match self.relay_request(&shutdown, &exited, request).await {
                    Ok(response) => response,
                    Err(session) => return session,
                },
                Err(err) => {
                    warn!(error = %err, "server sent an undecodable request");
                    Response::internal_error(format!("cannot decode request: {err}"))
                }
            };

            if let Some(err) = response.as_error() {
                warn!(code = %err.code, message = %err.message, "request failed");
            }

            let document = match response.to_value() {
                Ok(document) => document,
                Err(err) => {
                    error!(error = %err, "cannot encode response");
                    serde_json::json!({
                        "error": {"code": "internal_error", "message": err.to_string()}
                    })
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Session::Shutdown,
                sent = transport.send(document) => {
                    if let Err(err) = sent {
                        return Session::Dropped(err);
                    }
                }
            }
        }
    }

    /// Send one request to the worker and vet its reply
    async fn relay_request(
        &mut self,
        shutdown: &CancellationToken,
        exited: &CancellationToken,
        request: Request,
    ) -> std::result::Result<Response, Session> {
        let kind = request.kind();
        match &request {
            Request::Ping(_) => debug!("ping"),
            other => info!("{}", summarize(other)),
        }

        // A reply that is already readable beats the exit notification.
        let reply = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(Session::Shutdown),
            reply = self.worker.round_trip(&request) => reply,
            _ = exited.cancelled() => Err(WorkerError::Exited(None)),
        };

        match reply {
            Ok(response) if response.matches(kind) => Ok(response),
            Ok(response) => {
                warn!(request = %kind, response = ?response.kind(), "worker replied with the wrong variant");
                Ok(response.conform_to(kind))
            }
            // The monitor may hold a status the failed call did not see
            Err(err) if err.is_exit() => Err(Session::WorkerFailed(self.exit_error())),
            Err(err) => Err(Session::WorkerFailed(err)),
        }
    }

    fn transition(&mut self, next: RelayState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "relay state");
            self.state = next;
        }
    }

    fn exit_error(&self) -> WorkerError {
        WorkerError::Exited(self.worker.exit_status())
    }

    fn worker_gone(&self) -> RelayError {
        self.exit_error().into()
    }
}

/// Run `operation` unless shutdown or worker exit comes first
///
/// Shutdown wins ties so a cancelled relay never reports a worker failure.
async fn race<F: Future>(
    shutdown: &CancellationToken,
    exited: &CancellationToken,
    operation: F,
) -> Raced<F::Output> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Raced::Shutdown,
        _ = exited.cancelled() => Raced::WorkerExited,
        output = operation => Raced::Done(output),
    }
}

async fn close<T: Transport>(transport: &mut T) {
    match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
        Ok(Ok(())) => debug!("connection closed"),
        Ok(Err(err)) => debug!(error = %err, "close failed"),
        Err(_) => debug!("close timed out"),
    }
}

/// One-line description of a request for the log
pub fn summarize(request: &Request) -> String {
    match request {
        Request::GetAccount(req) => format!("get_account {}", req.account_ref),
        Request::ListGroups(req) => match &req.name_prefix {
            Some(prefix) => format!("list_groups starting with {prefix:?}"),
            None => "list_groups".to_string(),
        },
        Request::PerformOperation(req) => format!(
            "perform_operation {} on {}{}",
            req.operation,
            req.account_immutable_id,
            if req.dry_run { " (dry run)" } else { "" }
        ),
        other => other.kind().tag().to_string(),
    }
}
