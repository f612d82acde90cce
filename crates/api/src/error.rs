//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Order operation failure.
    Order(OrderError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, err) = match self {
            ApiError::BadRequest(msg) => {
                let body = serde_json::json!({ "error": msg });
                return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
            }
            ApiError::Order(err) => (order_error_status(&err), err),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "internal server error");
        }

        // Reservation failures still persisted an order row; expose its
        // id so callers can audit the failed order.
        let mut body = serde_json::json!({ "error": err.to_string() });
        if let Some(order_id) = reservation_order_id(&err) {
            body["order_id"] = serde_json::json!(order_id);
        }

        (status, axum::Json(body)).into_response()
    }
}

fn order_error_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::OrderNotFound(_) | OrderError::StockSkuNotFound(_) => StatusCode::NOT_FOUND,
        OrderError::NoStockForReserve { .. }
        | OrderError::StockInfoNotFound { .. }
        | OrderError::NotAwaitingPayment { .. }
        | OrderError::FailedOrPaid { .. } => StatusCode::CONFLICT,
        OrderError::EmptyOrder | OrderError::ZeroCount(_) => StatusCode::BAD_REQUEST,
        OrderError::ReservationFailed { .. } | OrderError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn reservation_order_id(err: &OrderError) -> Option<common::OrderId> {
    match err {
        OrderError::NoStockForReserve { order_id, .. }
        | OrderError::StockInfoNotFound { order_id, .. }
        | OrderError::ReservationFailed { order_id, .. } => Some(*order_id),
        _ => None,
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}
