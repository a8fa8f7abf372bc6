//! Architectural Contract Test: Core-Owned Retry and Cancellation
//!
//! This test verifies that every API call made through `OpContext` is
//! classified, retried and cancelled by the core, never by the client.
//!
//! Constraints verified:
//! - 5xx and transport failures are retried with backoff
//! - 429 honours Retry-After
//! - other 4xx and authentication failures are returned at once
//! - backoff sleeps are interruptible by cancellation
//!
//! If this test fails, retry policy has leaked out of the core or a sleep
//! has become uninterruptible.

mod common;

use common::*;
use ddprov_core::error::Error;
use ddprov_core::retry::RetryPolicy;
use ddprov_core::traits::{ApiRequest, ApiResponse, OpContext};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() {
    let api = Arc::new(ScriptedApi::new(
        vec![
            Ok(ApiResponse::new(503, Value::Null)),
            Err(Error::transient("connection reset")),
        ],
        ApiResponse::ok(json!({"id": 7})),
    ));
    let ctx = OpContext::new(api.clone(), quick_retry());

    let body = ctx.call_json(ApiRequest::get("/api/v1/monitor/7")).await.unwrap();
    assert_eq!(body["id"], json!(7));
    assert_eq!(api.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_honours_retry_after() {
    let api = Arc::new(ScriptedApi::new(
        vec![Ok(ApiResponse::new(429, Value::Null).with_retry_after(Duration::from_secs(7)))],
        ApiResponse::ok(json!({})),
    ));
    let ctx = OpContext::new(api.clone(), quick_retry());

    let started = Instant::now();
    ctx.call(ApiRequest::get("/api/v1/slo")).await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(7), "waited {:?}", waited);
    assert!(waited < Duration::from_secs(8), "waited {:?}", waited);
    assert_eq!(api.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn client_errors_fail_immediately_with_body() {
    let api = Arc::new(ScriptedApi::new(
        vec![Ok(ApiResponse::new(422, json!({"errors": ["invalid query"]})))],
        ApiResponse::ok(json!({})),
    ));
    let ctx = OpContext::new(api.clone(), quick_retry());

    match ctx.call(ApiRequest::post("/api/v1/monitor", json!({}))).await {
        Err(Error::RemoteRejected { status, body }) => {
            assert_eq!(status, 422);
            assert!(body.contains("invalid query"));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(api.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn authentication_failure_is_fatal_and_not_retried() {
    let api = Arc::new(ScriptedApi::always(403));
    let ctx = OpContext::new(api.clone(), quick_retry());

    let err = ctx.call(ApiRequest::get("/api/v1/validate")).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(api.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_backoff() {
    let api = Arc::new(ScriptedApi::always(500));
    let policy = RetryPolicy::new()
        .with_first_backoff(Duration::from_secs(30))
        .with_jitter(0.0);
    let ctx = OpContext::new(api.clone(), policy);

    let token = ctx.cancel_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        token.cancel();
    });

    let started = Instant::now();
    let err = ctx.call(ApiRequest::get("/api/v1/dashboard/x")).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(api.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_context_sends_nothing() {
    let api = Arc::new(ScriptedApi::always(200));
    let ctx = OpContext::new(api.clone(), quick_retry());
    ctx.cancel_token().cancel();

    assert!(matches!(
        ctx.call(ApiRequest::get("/api/v1/slo/1")).await,
        Err(Error::Cancelled)
    ));
    assert!(matches!(ctx.sleep(Duration::from_secs(1)).await, Err(Error::Cancelled)));
    assert_eq!(api.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_retries_return_first_failure() {
    let api = Arc::new(ScriptedApi::always(502));
    let ctx = OpContext::new(api.clone(), RetryPolicy::disabled());

    let err = ctx.call(ApiRequest::get("/api/v1/downtime/1")).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(api.call_count(), 1);
}
