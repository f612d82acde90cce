//! Stock read endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::Sku;
use serde::Serialize;
use storage::{OrderRepository, StockRepository};

use crate::error::ApiError;
use crate::routes::orders::AppState;

#[derive(Serialize)]
pub struct StockResponse {
    pub count: u32,
}

/// GET /stocks/:sku — free units for a SKU.
#[tracing::instrument(skip(state))]
pub async fn info<S>(
    State(state): State<Arc<AppState<S>>>,
    Path(sku): Path<i64>,
) -> Result<Json<StockResponse>, ApiError>
where
    S: OrderRepository + StockRepository + 'static,
{
    let count = state.orders.free_stock(Sku::new(sku)).await?;
    Ok(Json(StockResponse { count }))
}
