//! Admission control through a running server.
//!
//! Clients are told apart by `X-Forwarded-For`, which the harness trusts
//! from 127.0.0.1.

use std::time::{Duration, Instant};

use tollgate::Mode;
use tollgate::config::RateLimitConfig;

use super::harness::{body_json, get, get_as, header, start, start_with, status};

fn local_proxy() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}

fn rejecting(global: (f64, u32), client: (f64, u32)) -> RateLimitConfig {
    RateLimitConfig {
        mode: Mode::Reject,
        global_rate: global.0,
        global_burst: global.1,
        client_rate: client.0,
        client_burst: client.1,
        ..Default::default()
    }
}

/// A client that exhausts its burst gets 429 with code 1006 and a
/// Retry-After in whole seconds.
#[tokio::test]
async fn client_over_burst_gets_429_with_retry_after() {
    let server = start(Some(rejecting((1000.0, 1000), (0.5, 2)))).await;
    let addr = server.addr();

    let first = get(addr, "/ping", "").await;
    let second = get(addr, "/ping", "").await;
    let third = get(addr, "/ping", "").await;

    server.shutdown().await.unwrap();

    assert_eq!(status(&first), 200, "{first}");
    assert_eq!(status(&second), 200, "{second}");
    assert_eq!(status(&third), 429, "{third}");

    let body = body_json(&third);
    assert_eq!(body["code"], 1006);
    assert_eq!(
        header(&third, "retry-after"),
        Some("2"),
        "one token at 0.5/s is two seconds away:\n{third}"
    );
}

/// The global bucket caps everyone at once: the third client in a burst of
/// two is refused even though its own bucket is full.
#[tokio::test]
async fn global_limit_applies_across_clients() {
    let server = start_with(Some(rejecting((0.5, 2), (100.0, 100))), local_proxy()).await;
    let addr = server.addr();

    let a = get_as(addr, "/ping", "198.51.100.1").await;
    let b = get_as(addr, "/ping", "198.51.100.2").await;
    let c = get_as(addr, "/ping", "198.51.100.3").await;

    let clients = server.gate().expect("gate enabled").clients().clone();
    server.shutdown().await.unwrap();

    assert_eq!(status(&a), 200, "{a}");
    assert_eq!(status(&b), 200, "{b}");
    assert_eq!(status(&c), 429, "{c}");
    assert_eq!(body_json(&c)["code"], 1006);

    // A global refusal never reaches the per-client registry.
    assert_eq!(clients.len(), 2);
    assert!(!clients.contains("198.51.100.3"));
}

/// One client draining its bucket does not affect another.
#[tokio::test]
async fn clients_are_limited_independently() {
    let server = start_with(Some(rejecting((1000.0, 1000), (0.5, 1))), local_proxy()).await;
    let addr = server.addr();

    let a1 = get_as(addr, "/ping", "203.0.113.7").await;
    let a2 = get_as(addr, "/ping", "203.0.113.7").await;
    let b1 = get_as(addr, "/ping", "203.0.113.8").await;

    server.shutdown().await.unwrap();

    assert_eq!(status(&a1), 200, "{a1}");
    assert_eq!(body_json(&a1)["data"]["client"], "203.0.113.7");
    assert_eq!(status(&a2), 429, "{a2}");
    assert_eq!(status(&b1), 200, "{b1}");
    assert_eq!(body_json(&b1)["data"]["client"], "203.0.113.8");
}

/// Forwarded headers from an untrusted peer are ignored, so spoofing a new
/// address does not buy a fresh bucket.
#[tokio::test]
async fn untrusted_forwarded_for_is_ignored() {
    let server = start(Some(rejecting((1000.0, 1000), (0.5, 1)))).await;
    let addr = server.addr();

    let first = get_as(addr, "/ping", "192.0.2.1").await;
    let spoofed = get_as(addr, "/ping", "192.0.2.2").await;

    server.shutdown().await.unwrap();

    assert_eq!(status(&first), 200, "{first}");
    assert_eq!(body_json(&first)["data"]["client"], "127.0.0.1");
    assert_eq!(status(&spoofed), 429, "{spoofed}");
}

/// In wait mode a burst beyond capacity is delayed rather than refused.
#[tokio::test]
async fn wait_mode_smooths_bursts() {
    let server = start(Some(RateLimitConfig {
        mode: Mode::Wait,
        client_rate: 10.0,
        client_burst: 1,
        ..Default::default()
    }))
    .await;
    let addr = server.addr();

    let started = Instant::now();
    let requests: Vec<_> = (0..3)
        .map(|_| tokio::spawn(async move { get(addr, "/ping", "").await }))
        .collect();

    let mut statuses = Vec::new();
    for request in requests {
        statuses.push(status(&request.await.unwrap()));
    }
    let elapsed = started.elapsed();

    server.shutdown().await.unwrap();

    assert_eq!(statuses, vec![200, 200, 200]);
    // Two of the three waited 100ms each for a token.
    assert!(
        elapsed >= Duration::from_millis(150),
        "burst was not smoothed: {elapsed:?}"
    );
}

/// A wait longer than `max_wait_ms` ends in 429 instead of queueing.
#[tokio::test]
async fn wait_mode_gives_up_after_max_wait() {
    let server = start(Some(RateLimitConfig {
        mode: Mode::Wait,
        client_rate: 0.5,
        client_burst: 1,
        max_wait_ms: 100,
        ..Default::default()
    }))
    .await;
    let addr = server.addr();

    let first = get(addr, "/ping", "").await;
    let started = Instant::now();
    let second = get(addr, "/ping", "").await;
    let elapsed = started.elapsed();

    server.shutdown().await.unwrap();

    assert_eq!(status(&first), 200, "{first}");
    assert_eq!(status(&second), 429, "{second}");
    assert_eq!(body_json(&second)["code"], 1006);
    assert!(elapsed < Duration::from_secs(1), "waited {elapsed:?}");
}

/// Shutting down releases requests still queued for tokens.
#[tokio::test]
async fn shutdown_releases_waiting_requests() {
    let server = start(Some(RateLimitConfig {
        mode: Mode::Wait,
        client_rate: 0.1,
        client_burst: 1,
        max_wait_ms: 60_000,
        ..Default::default()
    }))
    .await;
    let addr = server.addr();

    assert_eq!(status(&get(addr, "/ping", "").await), 200);

    let waiting = tokio::spawn(async move { get(addr, "/ping", "").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    server.shutdown().await.unwrap();
    let response = waiting.await.unwrap();

    assert_eq!(status(&response), 429, "{response}");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "shutdown waited on a queued request"
    );
}

/// With rate limiting disabled every request goes straight through.
#[tokio::test]
async fn disabled_rate_limit_admits_everything() {
    let server = start(None).await;
    let addr = server.addr();
    assert!(server.gate().is_none());

    for _ in 0..30 {
        let response = get(addr, "/ping", "").await;
        assert_eq!(status(&response), 200, "{response}");
    }

    server.shutdown().await.unwrap();
}

/// Denials still carry the trace id and standard headers.
#[tokio::test]
async fn rate_limited_responses_keep_trace_id() {
    let server = start(Some(rejecting((1000.0, 1000), (0.5, 1)))).await;
    let addr = server.addr();

    let _ = get(addr, "/ping", "").await;
    let denied = get(addr, "/ping", "X-Trace-Id: denied-trace-1\r\n").await;

    server.shutdown().await.unwrap();

    assert_eq!(status(&denied), 429, "{denied}");
    assert_eq!(header(&denied, "x-trace-id"), Some("denied-trace-1"));
    assert_eq!(header(&denied, "x-content-type-options"), Some("nosniff"));
}
