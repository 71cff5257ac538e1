//! HTTP transport tests against raw TCP backends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use resilient_client::config::{ClientConfig, TransportConfig};
use resilient_client::resilience::{Deadline, Operation, ResilienceError};
use resilient_client::transport::{StatusClassifier, TransportCall};
use resilient_client::{CallFailure, HttpTransport, Outcome, Request, ResilientClient, Strategy, TransportError};

mod common;

fn call(transport: HttpTransport, url: &str) -> TransportCall<HttpTransport> {
    TransportCall::new(Arc::new(transport), Request::get(url).unwrap(), StatusClassifier::default())
}

#[tokio::test]
async fn test_status_classification() {
    for (status, success) in [(200, true), (404, true), (429, true), (500, false), (503, false)] {
        let addr = common::start_mock_backend(status, "body").await;
        let outcome = call(HttpTransport::default(), &format!("http://{}/", addr))
            .attempt(CancellationToken::new())
            .await;

        match outcome {
            Outcome::Success(response) if success => {
                assert_eq!(response.status, status);
                assert_eq!(response.text(), "body");
            }
            Outcome::Recoverable(CallFailure::Status(response)) if !success => {
                assert_eq!(response.status, status);
            }
            other => panic!("status {} classified as {:?}", status, other),
        }
    }
}

#[tokio::test]
async fn test_connection_refused_is_recoverable() {
    let addr = common::closed_port().await;
    let outcome = call(HttpTransport::default(), &format!("http://{}/", addr))
        .attempt(CancellationToken::new())
        .await;

    assert!(
        matches!(outcome, Outcome::Recoverable(CallFailure::Transport(TransportError::Upstream(_)))),
        "{:?}",
        outcome
    );
}

#[tokio::test]
async fn test_unsupported_scheme_is_fatal() {
    let outcome = call(HttpTransport::default(), "https://127.0.0.1:1/")
        .attempt(CancellationToken::new())
        .await;

    assert!(
        matches!(outcome, Outcome::Fatal(CallFailure::Transport(TransportError::InvalidRequest(_)))),
        "{:?}",
        outcome
    );
}

#[tokio::test]
async fn test_cancellation_interrupts_exchange() {
    let addr = common::start_programmable_backend(common::ephemeral(), |_| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        (200, "too late".into())
    })
    .await;

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let outcome = call(HttpTransport::default(), &format!("http://{}/", addr))
        .attempt(cancel)
        .await;

    assert!(outcome.is_cancelled(), "{:?}", outcome);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_oversized_response_is_recoverable() {
    let addr = common::start_mock_backend(200, "this body is longer than the limit").await;
    let transport = HttpTransport::new(&TransportConfig {
        max_response_bytes: 8,
        ..TransportConfig::default()
    });

    let outcome = call(transport, &format!("http://{}/", addr))
        .attempt(CancellationToken::new())
        .await;

    assert!(
        matches!(outcome, Outcome::Recoverable(CallFailure::Transport(TransportError::Body(_)))),
        "{:?}",
        outcome
    );
}

#[tokio::test]
async fn test_exceeded_deadline_is_cancelled() {
    let addr = common::start_programmable_backend(common::ephemeral(), |_| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        (200, "too late".into())
    })
    .await;

    let client = ResilientClient::from_config(&ClientConfig::default());
    let root = CancellationToken::new();
    let deadline = Deadline::start(&root, Duration::from_millis(100));

    let err = client
        .send(
            Request::get(&format!("http://{}/", addr)).unwrap(),
            Strategy::Retry,
            deadline.token(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ResilienceError::Cancelled), "{:?}", err);
    assert!(!err.is_recoverable());
    assert_eq!(client.breaker_snapshot(&addr.to_string()).unwrap().consecutive_failures, 0);
    assert!(!root.is_cancelled());
}
