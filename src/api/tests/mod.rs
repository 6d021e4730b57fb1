use super::*;
use crate::fetch::{Fetch, FetchOutcome, FetchRegistry, FetchRequest};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;


/// Adapter that returns no items
struct EmptyFetcher;

#[async_trait]
impl Fetch for EmptyFetcher {
    async fn fetch(&self, _request: &FetchRequest) -> FetchOutcome {
        FetchOutcome::success(Vec::new())
    }
}

/// Manager over a fresh temporary state directory with a "stub" adapter
async fn create_test_manager() -> (RequestManager, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.persistence.state_dir = temp_dir.path().to_path_buf();
    config.persistence.data_dir = temp_dir.path().join("data");
    config.retry.success_wait = Duration::ZERO;
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();

    let registry = FetchRegistry::new().with("stub", Arc::new(EmptyFetcher));
    let manager = RequestManager::new(config, registry).await.unwrap();
    (manager, temp_dir)
}

fn router_for(manager: &RequestManager) -> Router {
    create_router(manager.clone(), Arc::new(manager.config().clone()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn stub_request(id: &str, priority: i64) -> Value {
    serde_json::json!({
        "id": id,
        "source_adapter": "stub",
        "endpoint": "search",
        "params": {
            "query": format!("#{id}"),
            "since": "2024-01-01",
            "until": "2024-01-03"
        },
        "priority": priority
    })
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (manager, _temp_dir) = create_test_manager().await;

    let api_handle = manager.spawn_api_server();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // shutdown stops the server through its graceful-shutdown hook
    manager.shutdown().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), api_handle)
        .await
        .expect("server should stop after shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cors_enabled() {
    let (manager, _temp_dir) = create_test_manager().await;
    let app = router_for(&manager);

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let (manager, _temp_dir) = create_test_manager().await;
    let mut config = manager.config().clone();
    config.api.cors_enabled = false;
    let app = create_router(manager.clone(), Arc::new(config));

    let request = Request::builder()
        .uri("/api/v1/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_routes_live_under_prefix() {
    let (manager, _temp_dir) = create_test_manager().await;

    let (status, _) = send(router_for(&manager), get("/health")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
