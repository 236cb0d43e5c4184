//! Worker subprocess tests against small shell-script workers

#![cfg(unix)]

use diragent_protocol::{ErrorCode, ListGroupsRequest, PingRequest, Request, Response};
use diragent_transport::{Worker, WorkerCommand, WorkerConfig, WorkerError, WorkerProcess};
use std::time::Duration;

const CONFIGURE_OK: &str = r#"{"configure":{"traits":{"name":"sh","can_unlock":true}}}"#;

fn script(body: &str) -> WorkerConfig {
    WorkerConfig::new(WorkerCommand::Shell(body.to_string()))
        .with_terminate_grace(Duration::from_secs(2))
}

/// A worker that answers configure, ping, and list_groups
fn well_behaved() -> WorkerConfig {
    script(&format!(
        r#"[ "$DIRAGENT_WORKER" = true ] || exit 7
while read -r line; do
  case "$line" in
    *configure*) echo '{CONFIGURE_OK}' ;;
    *ping*) echo '{{}}' ;;
    *list_groups*) echo '{{"list_groups":{{"groups":[{{"immutable_id":"g1","name":"Eng","kind":"group"}}]}}}}' ;;
    *) echo '{{"error":{{"code":"internal_error","message":"unknown"}}}}' ;;
  esac
done"#
    ))
}

#[tokio::test]
async fn test_handshake_and_round_trips() {
    let mut worker = WorkerProcess::start(well_behaved()).await.unwrap();
    assert_eq!(worker.configuration().traits.name, "sh");
    assert_eq!(worker.configuration().traits.can_unlock, Some(true));

    let resp = worker
        .round_trip(&Request::Ping(PingRequest {}))
        .await
        .unwrap();
    assert_eq!(resp, Response::Ping);

    let resp = worker
        .round_trip(&Request::ListGroups(ListGroupsRequest::default()))
        .await
        .unwrap();
    match resp {
        Response::ListGroups(page) => {
            assert_eq!(page.groups.len(), 1);
            assert_eq!(page.groups[0].name, "Eng");
            assert!(page.next_cursor.is_none());
        }
        other => panic!("unexpected response {other:?}"),
    }

    worker.terminate().await.unwrap();
    assert!(worker.exited().is_cancelled());
    assert!(worker.exit_status().is_some());
}

#[tokio::test]
async fn test_pretty_printed_responses_are_accepted() {
    let config = script(
        r#"read -r line; printf '{\n  "configure": {\n    "traits": {"name": "x"}\n  }\n}\n'
while read -r line; do printf '{\n  "list_groups": {\n    "groups": []\n  }\n}\n'; done"#,
    );
    let mut worker = WorkerProcess::start(config).await.unwrap();
    assert_eq!(worker.configuration().traits.name, "x");

    for _ in 0..2 {
        let resp = worker
            .round_trip(&Request::ListGroups(ListGroupsRequest::default()))
            .await
            .unwrap();
        assert!(matches!(resp, Response::ListGroups(ref page) if page.groups.is_empty()));
    }

    worker.terminate().await.unwrap();
}

#[tokio::test]
async fn test_handshake_error_is_fatal() {
    let config = script(
        r#"read -r line; echo '{"error":{"code":"configuration_error","message":"bad bind password"}}'"#,
    );
    let err = WorkerProcess::start(config).await.err().unwrap();
    match err {
        WorkerError::Handshake(msg) => assert!(msg.contains("bad bind password"), "{msg}"),
        other => panic!("expected handshake error, got {other}"),
    }
}

#[tokio::test]
async fn test_handshake_wrong_variant_is_fatal() {
    let config = script(r#"read -r line; echo '{"list_groups":{"groups":[]}}'; cat >/dev/null"#);
    let err = WorkerProcess::start(config).await.err().unwrap();
    match err {
        WorkerError::Handshake(msg) => {
            assert!(msg.contains("worker must set 'configure'"), "{msg}")
        }
        other => panic!("expected handshake error, got {other}"),
    }
}

#[tokio::test]
async fn test_handshake_garbage_is_fatal() {
    let config = script(r#"read -r line; echo 'this is not json'"#);
    assert!(matches!(
        WorkerProcess::start(config).await,
        Err(WorkerError::Handshake(_))
    ));
}

#[tokio::test]
async fn test_worker_exit_before_handshake() {
    let config = script("exit 1");
    assert!(matches!(
        WorkerProcess::start(config).await,
        Err(WorkerError::Handshake(_))
    ));
}

#[tokio::test]
async fn test_exit_mid_session_is_reported() {
    let config = script(&format!(
        r#"read -r line; echo '{CONFIGURE_OK}'; read -r line; exit 4"#
    ));
    let mut worker = WorkerProcess::start(config).await.unwrap();
    let exited = worker.exited();

    let err = worker
        .round_trip(&Request::Ping(PingRequest {}))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Exited(_)), "{err}");

    tokio::time::timeout(Duration::from_secs(5), exited.cancelled())
        .await
        .expect("exit token should fire");
}

#[tokio::test]
async fn test_undecodable_response_is_protocol_violation() {
    let config = script(&format!(
        r#"read -r line; echo '{CONFIGURE_OK}'; read -r line; echo '{{"configure":{{"traits":{{"name":"x"}}}},"error":{{"code":"internal_error","message":"x"}}}}'; cat >/dev/null"#
    ));
    let mut worker = WorkerProcess::start(config).await.unwrap();

    let err = worker
        .round_trip(&Request::Ping(PingRequest {}))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Protocol(_)), "{err}");
    worker.terminate().await.unwrap();
}

#[tokio::test]
async fn test_request_timeout_is_fatal() {
    let config = script(&format!(
        r#"read -r line; echo '{CONFIGURE_OK}'; cat >/dev/null"#
    ))
    .with_request_timeout(Duration::from_millis(500));
    let mut worker = WorkerProcess::start(config).await.unwrap();

    let err = worker
        .round_trip(&Request::Ping(PingRequest {}))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Timeout(_)), "{err}");
    worker.terminate().await.unwrap();
}

#[tokio::test]
async fn test_error_responses_pass_through() {
    let mut worker = WorkerProcess::start(well_behaved()).await.unwrap();
    let resp = worker
        .round_trip(&Request::from_json(r#"{"list_accounts":{}}"#).unwrap())
        .await
        .unwrap();
    assert_eq!(
        resp.as_error().map(|e| e.code),
        Some(ErrorCode::InternalError)
    );
    worker.terminate().await.unwrap();
}
