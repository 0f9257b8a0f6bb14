//! Error taxonomy tests (§7, §8 scenario 5 "timeout classification"):
//! every transfer failure lands in exactly one of the nine `ErrorKind`
//! buckets, and the classification survives an actual `reqwest` round
//! trip against a stubbed server rather than only a hand-built
//! `reqwest::Error`.

use std::sync::Arc;
use std::time::Duration;

use loadcore::dns_cache::DnsCache;
use loadcore::errors::ErrorKind;
use loadcore::event_loop::{EventLoop, EventLoopConfig};
use loadcore::transfer::Request;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn new_event_loop(client: reqwest::Client) -> EventLoop {
    EventLoop::new(
        EventLoopConfig {
            num_workers: 1,
            max_concurrent_total: 4,
            target_rps: 0.0,
            burst: None,
            poll_timeout_ms: 1,
        },
        client,
        Arc::new(DnsCache::new()),
    )
}

#[tokio::test]
async fn slow_stub_past_client_timeout_classifies_as_timeout() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let event_loop = new_event_loop(client);

    let mut request = Request::get(format!("{}/slow", server.uri()));
    request.timeout = Duration::from_millis(50);

    let outcome = event_loop.submit_async(request).await;
    let err = outcome.expect_err("request should exceed the client timeout");
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(!err.message.is_empty());

    event_loop.stop(true);
}

#[tokio::test]
async fn unreachable_host_classifies_as_connection_failed_or_dns_error() {
    let client = reqwest::Client::new();
    let event_loop = new_event_loop(client);

    let outcome = event_loop.submit_async(Request::get("http://127.0.0.1:1/unreachable")).await;
    let err = outcome.expect_err("loopback port 1 should refuse the connection");
    assert!(matches!(
        err.kind,
        ErrorKind::ConnectionFailed | ErrorKind::DnsError
    ));

    event_loop.stop(true);
}

#[tokio::test]
async fn unresolvable_hostname_classifies_as_dns_error() {
    let client = reqwest::Client::new();
    let event_loop = new_event_loop(client);

    let outcome = event_loop
        .submit_async(Request::get("http://this-host-should-not-resolve.invalid/path"))
        .await;
    let err = outcome.expect_err("bogus TLD should not resolve");
    assert_eq!(err.kind, ErrorKind::DnsError);

    event_loop.stop(true);
}

#[tokio::test]
async fn successful_response_carries_no_error() {
    let server = MockServer::start().await;
    Mock::given(path("/ok"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let event_loop = new_event_loop(client);

    let outcome = event_loop.submit_async(Request::get(format!("{}/ok", server.uri()))).await;
    let response = outcome.expect("stub should respond");
    assert_eq!(response.status, 204);

    event_loop.stop(true);
}

#[test]
fn all_nine_error_kinds_have_distinct_stable_labels() {
    let mut labels = std::collections::HashSet::new();
    for kind in ErrorKind::all() {
        assert!(labels.insert(kind.label()), "duplicate label for {kind:?}");
    }
    assert_eq!(labels.len(), 9);
}
