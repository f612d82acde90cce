//! Order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{Item, OrderId, OrderStatus, UserId};
use domain::{CancelOutcome, OrderService, PayOutcome};
use serde::{Deserialize, Serialize};
use storage::{OrderRepository, StockRepository};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub orders: OrderService<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user: i64,
    pub items: Vec<ItemRequest>,
}

#[derive(Deserialize)]
pub struct ItemRequest {
    pub sku: i64,
    pub count: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: OrderId,
}

#[derive(Serialize)]
pub struct OrderInfoResponse {
    pub user: UserId,
    pub status: OrderStatus,
    pub items: Vec<ItemResponse>,
}

#[derive(Serialize)]
pub struct ItemResponse {
    pub sku: i64,
    pub count: u32,
}

#[derive(Serialize)]
pub struct PayResponse {
    pub outcome: PayOutcome,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub outcome: CancelOutcome,
}

// -- Handlers --

/// POST /orders — create an order and reserve stock for its items.
#[tracing::instrument(skip(state, req))]
pub async fn create<S>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError>
where
    S: OrderRepository + StockRepository + 'static,
{
    let items: Vec<Item> = req
        .items
        .iter()
        .map(|item| Item::new(item.sku, item.count))
        .collect();

    let order_id = state.orders.create(UserId::new(req.user), items).await?;

    Ok((StatusCode::CREATED, Json(OrderCreatedResponse { order_id })))
}

/// GET /orders/:id — read an order.
#[tracing::instrument(skip(state))]
pub async fn info<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<OrderInfoResponse>, ApiError>
where
    S: OrderRepository + StockRepository + 'static,
{
    let info = state.orders.info(OrderId::new(id)).await?;

    let items = info
        .items
        .iter()
        .map(|item| ItemResponse {
            sku: item.sku.as_i64(),
            count: item.count,
        })
        .collect();

    Ok(Json(OrderInfoResponse {
        user: info.user_id,
        status: info.status,
        items,
    }))
}

/// POST /orders/:id/pay — settle payment for an order.
#[tracing::instrument(skip(state))]
pub async fn pay<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<PayResponse>, ApiError>
where
    S: OrderRepository + StockRepository + 'static,
{
    let outcome = state.orders.pay(OrderId::new(id)).await?;
    Ok(Json(PayResponse { outcome }))
}

/// POST /orders/:id/cancel — cancel an unpaid order.
#[tracing::instrument(skip(state))]
pub async fn cancel<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<Json<CancelResponse>, ApiError>
where
    S: OrderRepository + StockRepository + 'static,
{
    let outcome = state.orders.cancel(OrderId::new(id)).await?;
    Ok(Json(CancelResponse { outcome }))
}
