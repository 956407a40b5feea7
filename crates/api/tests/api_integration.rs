//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::fixtures::sample_aggregate;
use domain::{OrderService, StoreErrorClassifier, StoreRetrier};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{ErrorKind, InMemoryAggregateStore, Operation};
use retry::{Backoff, RetryPolicy};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn retrier(max_attempts: u32) -> StoreRetrier {
    StoreRetrier::from_policy(
        RetryPolicy {
            max_attempts,
            backoff: Backoff::fixed(Duration::from_millis(1)),
        },
        StoreErrorClassifier,
    )
}

fn setup_with(
    max_attempts: u32,
    request_timeout: Duration,
) -> (axum::Router, Arc<OrderService<InMemoryAggregateStore>>) {
    let service = Arc::new(OrderService::new(InMemoryAggregateStore::new(), 100));
    let state = Arc::new(api::AppState::new(
        Arc::clone(&service),
        retrier(max_attempts),
        request_timeout,
    ));
    let app = api::create_app(state, get_metrics_handle());
    (app, service)
}

fn setup() -> (axum::Router, Arc<OrderService<InMemoryAggregateStore>>) {
    setup_with(3, Duration::from_secs(5))
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, axum::body::Bytes) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, body) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_get_cached_order() {
    let (app, service) = setup();
    let mut aggregate = sample_aggregate("api-cached", 2, 0);
    let id = service.create(&mut aggregate).await.unwrap();

    let (status, body) = get(app, &format!("/order/{id}")).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["order"]["order_uid"], "api-cached");
    assert_eq!(json["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_get_order_from_storage_after_cache_clear() {
    let (app, service) = setup();
    let id = service
        .create(&mut sample_aggregate("api-stored", 1, 0))
        .await
        .unwrap();
    service.cache().clear();

    let (status, body) = get(app, &format!("/order/{id}")).await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["order"]["id"], id.as_i64());
    assert_eq!(json["order"]["order_uid"], "api-stored");
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let (app, service) = setup();

    let (status, body) = get(app, "/order/999").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().is_some());
    // NotFound is terminal, so the lookup is not retried
    assert_eq!(service.store().transactions_started(), 1);
}

#[tokio::test]
async fn test_invalid_order_id_format() {
    let (app, service) = setup();

    let (status, _) = get(app.clone(), "/order/not-a-number").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app, "/order/0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(service.store().transactions_started(), 0);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let (app, service) = setup();
    let id = service
        .create(&mut sample_aggregate("api-retried", 1, 0))
        .await
        .unwrap();
    service.cache().clear();
    service
        .store()
        .fail_next(Operation::Begin, ErrorKind::Unavailable, 1);

    let (status, _) = get(app, &format!("/order/{id}")).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_exhausted_retries_are_internal_errors() {
    let (app, service) = setup_with(1, Duration::from_secs(5));
    service
        .store()
        .fail_next(Operation::Begin, ErrorKind::Unavailable, 1);

    let (status, body) = get(app, "/order/1").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_request_deadline_is_internal_error() {
    let (app, service) = setup_with(0, Duration::from_millis(50));
    service
        .store()
        .fail_next(Operation::Begin, ErrorKind::Unavailable, 10_000);

    let (status, _) = tokio::time::timeout(Duration::from_secs(5), get(app, "/order/1"))
        .await
        .unwrap();

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();

    let (status, _) = get(app, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
}
