//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - The health endpoint answers without a token
//! - Porter stats are listed for every replica
//! - Authentication middleware functions properly
//! - Mock injection reaches the named porter and reports errors correctly

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{Value, json};
use telemetry_porter::{
    api::{ApiConfig, ApiState, spawn_api_server},
    broker::MemoryBroker,
    collector::{CollectorPorter, Porter, Shutdown, ShutdownTrigger, shutdown_channel},
    store::MemoryLockStore,
};

use crate::helpers::{CountingAnalyzer, fast_config, memory_porter, spawn_porter, wait_until};

// Helper to create test API server
async fn spawn_test_api(porters: Vec<Arc<CollectorPorter>>, shutdown: Shutdown) -> SocketAddr {
    let porters = porters
        .into_iter()
        .map(|porter| porter as Arc<dyn Porter>)
        .collect();

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        auth_token: Some("test-token".to_string()),
    };

    spawn_api_server(config, ApiState::new(porters), shutdown)
        .await
        .unwrap()
}

fn idle_porter(name: &str, shutdown: Shutdown, identifier: &str) -> Arc<CollectorPorter> {
    memory_porter(
        fast_config(name, &[&format!("{name}_0")]),
        Arc::new(MemoryLockStore::new()),
        Arc::new(MemoryBroker::new()),
        Arc::new(CountingAnalyzer::default()),
        shutdown,
        identifier,
    )
}

async fn setup() -> (SocketAddr, Arc<CollectorPorter>, ShutdownTrigger) {
    let (trigger, shutdown) = shutdown_channel();
    let porter = idle_porter("snapshot", shutdown.clone(), "p0");
    let addr = spawn_test_api(vec![porter.clone()], shutdown).await;
    (addr, porter, trigger)
}

#[tokio::test]
async fn test_health_endpoint_is_public() {
    let (addr, _porter, _trigger) = setup().await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/v1/health", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["porters"], 1);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_porters_endpoint_lists_replicas() {
    let (trigger, shutdown) = shutdown_channel();
    let a = idle_porter("snapshot", shutdown.clone(), "p0");
    let b = idle_porter("snapshot", shutdown.clone(), "p1");
    let c = idle_porter("discover", shutdown.clone(), "p2");
    let addr = spawn_test_api(vec![a, b, c], shutdown).await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/v1/porters", addr))
        .header("Authorization", "Bearer test-token")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    let porters = json["porters"].as_array().unwrap();
    assert_eq!(porters.len(), 3);
    assert_eq!(porters[0]["name"], "snapshot");
    assert_eq!(porters[1]["identifier"], "p1");
    assert_eq!(porters[2]["name"], "discover");
    assert_eq!(porters[0]["is_master"], false);

    trigger.trigger();
}

#[tokio::test]
async fn test_auth_required_for_porters() {
    let (addr, _porter, _trigger) = setup().await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("http://{}/api/v1/porters", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let malformed = client
        .get(format!("http://{}/api/v1/porters", addr))
        .header("Authorization", "test-token")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::UNAUTHORIZED);

    let wrong = client
        .get(format!("http://{}/api/v1/porters", addr))
        .header("Authorization", "Bearer wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_mock_is_accepted_and_counted() {
    let (addr, porter, _trigger) = setup().await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/mock", addr))
        .header("Authorization", "Bearer test-token")
        .json(&json!({ "name": "snapshot", "message": "{\"cloudid\": 0}" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["accepted"], true);
    assert_eq!(json["name"], "snapshot");

    let stats = porter.stats();
    assert_eq!(stats.mocked, 1);
    assert_eq!(stats.queue_len, 1);
}

#[tokio::test]
async fn test_mock_reaches_running_analyzer() {
    let (trigger, shutdown) = shutdown_channel();
    let analyzer = Arc::new(CountingAnalyzer::default());
    let porter = memory_porter(
        fast_config("live", &["live_0"]),
        Arc::new(MemoryLockStore::new()),
        Arc::new(MemoryBroker::new()),
        analyzer.clone(),
        shutdown.clone(),
        "p0",
    );
    let run = spawn_porter(&porter);
    let addr = spawn_test_api(vec![porter], shutdown).await;

    let client = reqwest::Client::new();
    for i in 0..5 {
        let response = client
            .post(format!("http://{}/api/v1/mock", addr))
            .header("Authorization", "Bearer test-token")
            .json(&json!({ "name": "live", "message": format!("payload-{i}") }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    wait_until(Duration::from_secs(2), || analyzer.seen() == 5).await;

    trigger.trigger();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_mock_unknown_porter_is_not_found() {
    let (addr, porter, _trigger) = setup().await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/mock", addr))
        .header("Authorization", "Bearer test-token")
        .json(&json!({ "name": "nope", "message": "{}" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(porter.stats().mocked, 0);
}

#[tokio::test]
async fn test_mock_empty_name_is_bad_request() {
    let (addr, _porter, _trigger) = setup().await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/mock", addr))
        .header("Authorization", "Bearer test-token")
        .json(&json!({ "name": "", "message": "{}" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_mock_after_shutdown_is_unavailable() {
    let (api_trigger, api_shutdown) = shutdown_channel();
    let (porter_trigger, porter_shutdown) = shutdown_channel();
    let porter = idle_porter("closing", porter_shutdown, "p0");
    let addr = spawn_test_api(vec![porter.clone()], api_shutdown).await;

    porter_trigger.trigger();

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/mock", addr))
        .header("Authorization", "Bearer test-token")
        .json(&json!({ "name": "closing", "message": "{}" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(porter.stats().mocked, 0);

    api_trigger.trigger();
}
