//! Integration tests for the relay loop
//!
//! Drives the relay with the scripted connector and the in-process worker
//! from `diragent::testing`. Time is paused, so backoff sleeps complete
//! instantly.

use diragent::testing::{LocalWorker, MockConnector, MockSession};
use diragent::{MemoryDirectory, Relay, RelayError, RelayOptions, RelayState};
use diragent_core::retry::ExponentialBackoff;
use diragent_protocol::{
    ErrorCode, ListAccountsRequest, ListGroupsRequest, ListGroupsResponse, Operation,
    PerformOperationRequest, PingRequest, Request, Response,
};
use diragent_transport::{TransportError, WorkerError};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Outcome = (Result<(), RelayError>, RelayState);

fn directory() -> Arc<MemoryDirectory> {
    Arc::new(MemoryDirectory::new(
        serde_json::from_value(json!({
            "name": "Stub",
            "page_size": 2,
            "accounts": [
                {"immutable_id": "abc", "name": "Abc"},
                {"immutable_id": "def", "name": "Def", "locked": true},
                {"immutable_id": "ghi", "name": "Ghi"}
            ]
        }))
        .unwrap(),
    ))
}

fn options() -> RelayOptions {
    RelayOptions {
        backoff: ExponentialBackoff::builder()
            .min_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(10))
            .jitter(0.0)
            .build(),
    }
}

fn spawn(
    connector: &MockConnector,
    worker: LocalWorker<MemoryDirectory>,
    shutdown: &CancellationToken,
) -> JoinHandle<Outcome> {
    let mut relay = Relay::new(connector.clone(), worker, options(), shutdown.clone());
    assert_eq!(relay.state(), RelayState::Disconnected);
    tokio::spawn(async move {
        let result = relay.run().await;
        (result, relay.state())
    })
}

async fn finish(handle: JoinHandle<Outcome>) -> Outcome {
    tokio::time::timeout(Duration::from_secs(30), handle)
        .await
        .expect("relay did not stop")
        .unwrap()
}

async fn ping(session: &mut MockSession) {
    session.send_request(&Request::Ping(PingRequest {}));
    assert_eq!(session.recv().await, Some(json!({})));
}

#[tokio::test(start_paused = true)]
async fn test_forwards_requests_in_order() {
    let connector = MockConnector::new();
    let mut session = connector.accept().await;
    let worker = LocalWorker::new(directory());
    let terminated = worker.terminated();
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, worker, &shutdown);

    ping(&mut session).await;

    session.send_request(&Request::ListAccounts(ListAccountsRequest::default()));
    let Some(Response::ListAccounts(page)) = session.recv_response().await else {
        panic!("expected a list_accounts response");
    };
    assert_eq!(page.accounts.len(), 2);
    assert!(page.next_cursor.is_some());

    shutdown.cancel();
    let (result, state) = finish(handle).await;
    assert!(result.is_ok());
    assert_eq!(state, RelayState::Draining);
    assert!(session.is_closed());
    assert!(terminated.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_error_response_passes_through() {
    let connector = MockConnector::new();
    let mut session = connector.accept().await;
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, LocalWorker::new(directory()), &shutdown);

    session.send_request(&Request::PerformOperation(
        PerformOperationRequest::new(Operation::Unlock, "abc").dry_run(),
    ));
    let response = session.recv_response().await.unwrap();
    assert_eq!(
        response.as_error().map(|e| e.code),
        Some(ErrorCode::UnsupportedAccountState)
    );

    shutdown.cancel();
    assert!(finish(handle).await.0.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_variant_is_overridden() {
    let connector = MockConnector::new();
    let mut session = connector.accept().await;
    let worker = LocalWorker::new(directory())
        .with_override(|_, _| Response::ListGroups(ListGroupsResponse::default()));
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, worker, &shutdown);

    session.send_request(&Request::ListAccounts(ListAccountsRequest::default()));
    assert_eq!(
        session.recv_response().await,
        Some(Response::internal_error(
            "worker must set 'list_accounts' in response"
        ))
    );

    // The matching kind passes untouched
    session.send_request(&Request::ListGroups(ListGroupsRequest::default()));
    assert_eq!(
        session.recv_response().await,
        Some(Response::ListGroups(ListGroupsResponse::default()))
    );

    shutdown.cancel();
    assert!(finish(handle).await.0.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_data_in_reply_to_ping_is_overridden() {
    let connector = MockConnector::new();
    let mut session = connector.accept().await;
    let worker = LocalWorker::new(directory())
        .with_override(|_, _| Response::ListGroups(ListGroupsResponse::default()));
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, worker, &shutdown);

    session.send_request(&Request::Ping(PingRequest {}));
    let response = session.recv_response().await.unwrap();
    assert_eq!(
        response.as_error().map(|e| e.code),
        Some(ErrorCode::InternalError)
    );

    shutdown.cancel();
    assert!(finish(handle).await.0.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_request_answered_locally() {
    let connector = MockConnector::new();
    let mut session = connector.accept().await;
    let worker = LocalWorker::new(directory());
    let handled = worker.handled();
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, worker, &shutdown);

    session.send(json!({"ping": {}, "configure": {}}));
    let response = session.recv_response().await.unwrap();
    assert_eq!(
        response.as_error().map(|e| e.code),
        Some(ErrorCode::InternalError)
    );
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    ping(&mut session).await;
    assert_eq!(handled.load(Ordering::SeqCst), 1);

    shutdown.cancel();
    assert!(finish(handle).await.0.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_failures() {
    let connector = MockConnector::new();
    connector.refuse("connection refused").await;
    let mut first = connector.accept().await;
    let mut second = connector.accept().await;
    let mut third = connector.accept().await;
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, LocalWorker::new(directory()), &shutdown);

    ping(&mut first).await;
    first.fail(TransportError::Connection("connection reset".into()));

    ping(&mut second).await;
    second.hang_up();

    ping(&mut third).await;
    assert_eq!(connector.attempts(), 4);

    shutdown.cancel();
    let (result, _) = finish(handle).await;
    assert!(result.is_ok());
    assert!(third.is_closed());
    assert!(!first.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_between_attempts() {
    let connector = MockConnector::new();
    connector.refuse("down").await;
    connector.refuse("down").await;
    let mut session = connector.accept().await;
    let shutdown = CancellationToken::new();
    let started = tokio::time::Instant::now();
    let handle = spawn(&connector, LocalWorker::new(directory()), &shutdown);

    ping(&mut session).await;
    // 1s after the first failure, 2s after the second
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(4));

    shutdown.cancel();
    assert!(finish(handle).await.0.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_long_session_resets_backoff() {
    let connector = MockConnector::new();
    connector.refuse("down").await;
    connector.refuse("down").await;
    let mut first = connector.accept().await;
    let mut second = connector.accept().await;
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, LocalWorker::new(directory()), &shutdown);

    ping(&mut first).await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    first.fail(TransportError::Connection("connection reset".into()));

    let dropped = tokio::time::Instant::now();
    ping(&mut second).await;
    assert!(dropped.elapsed() < Duration::from_secs(2));

    shutdown.cancel();
    assert!(finish(handle).await.0.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_short_session_keeps_backoff() {
    let connector = MockConnector::new();
    connector.refuse("down").await;
    connector.refuse("down").await;
    let mut first = connector.accept().await;
    let mut second = connector.accept().await;
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, LocalWorker::new(directory()), &shutdown);

    ping(&mut first).await;
    first.fail(TransportError::Connection("connection reset".into()));

    let dropped = tokio::time::Instant::now();
    ping(&mut second).await;
    // Third consecutive failure waits 4s
    assert!(dropped.elapsed() >= Duration::from_secs(4));

    shutdown.cancel();
    assert!(finish(handle).await.0.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_worker_exit_mid_session_is_fatal() {
    let connector = MockConnector::new();
    let mut session = connector.accept().await;
    let worker = LocalWorker::new(directory()).exit_after(1);
    let terminated = worker.terminated();
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, worker, &shutdown);

    ping(&mut session).await;
    session.send_request(&Request::ListAccounts(ListAccountsRequest::default()));

    let (result, state) = finish(handle).await;
    assert!(matches!(
        result,
        Err(RelayError::Worker(WorkerError::Exited(_)))
    ));
    assert_eq!(state, RelayState::Draining);
    assert!(terminated.is_cancelled());
    assert!(session.is_closed());
    assert!(!shutdown.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_worker_exit_while_disconnected_is_fatal() {
    // No scripted sessions: every connect attempt hangs
    let connector = MockConnector::new();
    let worker = LocalWorker::new(directory());
    let exit = worker.exit_handle();
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, worker, &shutdown);

    tokio::time::sleep(Duration::from_secs(1)).await;
    exit.cancel();

    let (result, _) = finish(handle).await;
    assert!(matches!(result, Err(RelayError::Worker(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_connecting() {
    let connector = MockConnector::new();
    let worker = LocalWorker::new(directory());
    let terminated = worker.terminated();
    let shutdown = CancellationToken::new();
    let handle = spawn(&connector, worker, &shutdown);

    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown.cancel();

    let (result, state) = finish(handle).await;
    assert!(result.is_ok());
    assert_eq!(state, RelayState::Draining);
    assert!(terminated.is_cancelled());
    assert_eq!(connector.attempts(), 1);
}
