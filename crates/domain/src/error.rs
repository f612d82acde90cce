//! The order error taxonomy.

use common::{OrderId, OrderStatus, Sku};
use storage::StorageError;
use thiserror::Error;

/// Errors surfaced by [`crate::OrderService`].
///
/// Reservation failures during create carry the id of the order that was
/// persisted before the reservation ran: the order row survives at
/// `failed` for audit, so callers must not assume an error means no side
/// effect.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order does not exist.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// No stock row exists for the SKU.
    #[error("no stock record for sku {0}")]
    StockSkuNotFound(Sku),

    /// A SKU in the created order has no stock row; the order was set to
    /// `failed`.
    #[error("order {order_id}: no stock record for sku {sku}")]
    StockInfoNotFound { order_id: OrderId, sku: Sku },

    /// A SKU in the created order has fewer free units than requested;
    /// the order was set to `failed`.
    #[error("order {order_id}: not enough free stock for sku {sku}")]
    NoStockForReserve { order_id: OrderId, sku: Sku },

    /// The reservation failed for an infrastructure reason; the order was
    /// set to `failed`.
    #[error("order {order_id}: reservation failed")]
    ReservationFailed {
        order_id: OrderId,
        #[source]
        source: StorageError,
    },

    /// Pay requires the order to be awaiting payment.
    #[error("order {order_id} is not awaiting payment: {status}")]
    NotAwaitingPayment {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Cancel refuses money-settled and already-dead orders.
    #[error("order {order_id} is {status} and cannot be cancelled")]
    FailedOrPaid {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// An order must have at least one line item.
    #[error("order has no items")]
    EmptyOrder,

    /// Every line item must request at least one unit.
    #[error("item count for sku {0} must be positive")]
    ZeroCount(Sku),

    /// Any other storage failure.
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for OrderError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::OrderNotFound(id) => OrderError::OrderNotFound(id),
            StorageError::StockSkuNotFound(sku) => OrderError::StockSkuNotFound(sku),
            other => OrderError::Storage(other),
        }
    }
}

impl OrderError {
    /// The id of the order the failed operation still persisted or
    /// touched, where one exists.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            OrderError::OrderNotFound(id) => Some(*id),
            OrderError::StockInfoNotFound { order_id, .. }
            | OrderError::NoStockForReserve { order_id, .. }
            | OrderError::ReservationFailed { order_id, .. }
            | OrderError::NotAwaitingPayment { order_id, .. }
            | OrderError::FailedOrPaid { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }
}
