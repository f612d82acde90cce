//! Integration tests for the API server against the in-memory store.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::Stock;
use domain::{EveryNthPrimary, OrderService};
use metrics_exporter_prometheus::PrometheusHandle;
use storage::{MemoryStore, StockRepository};
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

fn setup() -> (axum::Router, MemoryStore) {
    let store = MemoryStore::new("order-events");
    let orders = OrderService::new(store.clone(), Arc::new(EveryNthPrimary::new(10)));
    let state = Arc::new(api::AppState { orders });
    let app = api::create_app(state, get_metrics_handle());
    (app, store)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_check() {
    let (app, _) = setup();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn create_order_reserves_stock() {
    let (app, store) = setup();
    store.put(Stock::new(1, 10, 0)).await.unwrap();

    let response = app
        .oneshot(post_json(
            "/orders",
            serde_json::json!({ "user": 42, "items": [{ "sku": 1, "count": 3 }] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["order_id"], 1);

    assert_eq!(store.stock(1).await.unwrap().reserved, 3);
}

#[tokio::test]
async fn create_without_stock_conflicts_but_persists_the_order() {
    let (app, _store) = setup();

    let response = app
        .clone()
        .oneshot(post_json(
            "/orders",
            serde_json::json!({ "user": 42, "items": [{ "sku": 404, "count": 1 }] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    let order_id = json["order_id"].as_i64().expect("order id in error body");
    assert!(json["error"].as_str().unwrap().contains("404"));

    // The persisted order is readable, at `failed`.
    let response = app
        .oneshot(get(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "failed");
}

#[tokio::test]
async fn create_with_insufficient_stock_conflicts() {
    let (app, store) = setup();
    store.put(Stock::new(1, 2, 0)).await.unwrap();

    let response = app
        .oneshot(post_json(
            "/orders",
            serde_json::json!({ "user": 1, "items": [{ "sku": 1, "count": 3 }] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(store.stock(1).await.unwrap().reserved, 0);
}

#[tokio::test]
async fn create_with_no_items_is_a_bad_request() {
    let (app, _) = setup();

    let response = app
        .oneshot(post_json(
            "/orders",
            serde_json::json!({ "user": 1, "items": [] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_info_returns_sorted_items() {
    let (app, store) = setup();
    store.put(Stock::new(3, 10, 0)).await.unwrap();
    store.put(Stock::new(9, 10, 0)).await.unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/orders",
            serde_json::json!({ "user": 7, "items": [
                { "sku": 9, "count": 1 },
                { "sku": 3, "count": 2 }
            ] }),
        ))
        .await
        .unwrap();
    let order_id = body_json(response).await["order_id"].as_i64().unwrap();

    let response = app
        .oneshot(get(&format!("/orders/{order_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["user"], 7);
    assert_eq!(json["status"], "awaiting_payment");
    assert_eq!(
        json["items"],
        serde_json::json!([
            { "sku": 3, "count": 2 },
            { "sku": 9, "count": 1 }
        ])
    );
}

#[tokio::test]
async fn missing_order_is_not_found() {
    let (app, _) = setup();

    let response = app.oneshot(get("/orders/404")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pay_is_idempotent() {
    let (app, store) = setup();
    store.put(Stock::new(1, 10, 0)).await.unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/orders",
            serde_json::json!({ "user": 1, "items": [{ "sku": 1, "count": 4 }] }),
        ))
        .await
        .unwrap();
    let order_id = body_json(response).await["order_id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/orders/{order_id}/pay"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["outcome"], "paid");

    let response = app
        .oneshot(post_json(
            &format!("/orders/{order_id}/pay"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["outcome"], "already_paid");

    // Stock was consumed exactly once.
    let stock = store.stock(1).await.unwrap();
    assert_eq!((stock.total_count, stock.reserved), (6, 0));
}

#[tokio::test]
async fn cancel_after_pay_conflicts() {
    let (app, store) = setup();
    store.put(Stock::new(1, 10, 0)).await.unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/orders",
            serde_json::json!({ "user": 1, "items": [{ "sku": 1, "count": 1 }] }),
        ))
        .await
        .unwrap();
    let order_id = body_json(response).await["order_id"].as_i64().unwrap();

    app.clone()
        .oneshot(post_json(
            &format!("/orders/{order_id}/pay"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            &format!("/orders/{order_id}/cancel"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_returns_stock() {
    let (app, store) = setup();
    store.put(Stock::new(1, 10, 0)).await.unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/orders",
            serde_json::json!({ "user": 1, "items": [{ "sku": 1, "count": 4 }] }),
        ))
        .await
        .unwrap();
    let order_id = body_json(response).await["order_id"].as_i64().unwrap();

    let response = app
        .oneshot(post_json(
            &format!("/orders/{order_id}/cancel"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["outcome"], "cancelled");

    let stock = store.stock(1).await.unwrap();
    assert_eq!((stock.total_count, stock.reserved), (10, 0));
}

#[tokio::test]
async fn stock_info_and_unknown_sku() {
    let (app, store) = setup();
    store.put(Stock::new(1, 10, 4)).await.unwrap();

    let response = app.clone().oneshot(get("/stocks/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["count"], 6);

    let response = app.oneshot(get("/stocks/404")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let (app, _) = setup();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
