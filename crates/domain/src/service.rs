//! Order operations over the durable stores.

use std::sync::Arc;

use common::{Item, OrderId, OrderInfo, OrderStatus, Sku, UserId};
use serde::Serialize;
use storage::{OrderRepository, StockRepository, StorageError};

use crate::error::OrderError;
use crate::routing::{ReadKind, ReadRouting};

/// Result of a pay request.
///
/// `AlreadyPaid` is the idempotent-success signal: a repeat pay request
/// is a no-op, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayOutcome {
    Paid,
    AlreadyPaid,
}

/// Result of a cancel request, with the same idempotent-success shape as
/// [`PayOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    AlreadyCancelled,
}

/// Service driving orders through their lifecycle.
///
/// Legality of every transition comes from
/// [`OrderStatus::can_transition_to`]; durability, locking, and the
/// transactional outbox come from the store. Pay and cancel read the
/// order from the primary so a stale replica can never gate a
/// transition; info and stock reads follow the injected routing policy.
pub struct OrderService<S> {
    store: S,
    routing: Arc<dyn ReadRouting>,
}

impl<S> OrderService<S>
where
    S: OrderRepository + StockRepository,
{
    pub fn new(store: S, routing: Arc<dyn ReadRouting>) -> Self {
        Self { store, routing }
    }

    /// Creates an order and reserves inventory for all of its items.
    ///
    /// The order is persisted at `new` before the reservation runs. On
    /// success it moves to `awaiting_payment`; on any reservation error
    /// it moves to `failed` and the returned error carries the persisted
    /// order id. Items are normalized to ascending SKU order.
    #[tracing::instrument(skip(self, items), fields(user_id = %user_id, items = items.len()))]
    pub async fn create(&self, user_id: UserId, mut items: Vec<Item>) -> Result<OrderId, OrderError> {
        if items.is_empty() {
            return Err(OrderError::EmptyOrder);
        }
        if let Some(item) = items.iter().find(|item| item.count == 0) {
            return Err(OrderError::ZeroCount(item.sku));
        }
        items.sort_by_key(|item| item.sku);

        let order_id = self.store.create(user_id, &items).await?;

        if let Err(err) = self.store.reserve(&items).await {
            self.store.set_status(order_id, OrderStatus::Failed).await?;
            metrics::counter!("orders_failed_total").increment(1);
            tracing::warn!(%order_id, error = %err, "reservation failed");

            return Err(match err {
                StorageError::NoStockForReserve(sku) => {
                    OrderError::NoStockForReserve { order_id, sku }
                }
                StorageError::StockInfoNotFound(sku) => {
                    OrderError::StockInfoNotFound { order_id, sku }
                }
                source => OrderError::ReservationFailed { order_id, source },
            });
        }

        self.store
            .set_status(order_id, OrderStatus::AwaitingPayment)
            .await?;
        metrics::counter!("orders_created_total").increment(1);

        Ok(order_id)
    }

    /// Settles payment for an order awaiting it.
    ///
    /// Consumes the reserved units (both counters drop) and moves the
    /// order to `paid`. Repeat calls return
    /// [`PayOutcome::AlreadyPaid`] without touching stock.
    #[tracing::instrument(skip(self))]
    pub async fn pay(&self, order_id: OrderId) -> Result<PayOutcome, OrderError> {
        let info = self
            .store
            .info_primary(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        if info.status == OrderStatus::Paid {
            return Ok(PayOutcome::AlreadyPaid);
        }
        if !info.status.can_transition_to(OrderStatus::Paid) {
            return Err(OrderError::NotAwaitingPayment {
                order_id,
                status: info.status,
            });
        }

        self.store.release_on_payment(&info.items).await?;
        self.store.set_status(order_id, OrderStatus::Paid).await?;
        metrics::counter!("orders_paid_total").increment(1);

        Ok(PayOutcome::Paid)
    }

    /// Cancels an unpaid order, returning its reserved units to the free
    /// pool.
    ///
    /// Orders at `paid` or `failed` cannot be cancelled; repeat calls on
    /// a cancelled order return [`CancelOutcome::AlreadyCancelled`]
    /// without touching stock.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<CancelOutcome, OrderError> {
        let info = self
            .store
            .info_primary(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        if info.status == OrderStatus::Cancelled {
            return Ok(CancelOutcome::AlreadyCancelled);
        }
        if !info.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(OrderError::FailedOrPaid {
                order_id,
                status: info.status,
            });
        }

        self.store.release_on_cancel(&info.items).await?;
        self.store
            .set_status(order_id, OrderStatus::Cancelled)
            .await?;
        metrics::counter!("orders_cancelled_total").increment(1);

        Ok(CancelOutcome::Cancelled)
    }

    /// Reads an order, routed between primary and replica.
    #[tracing::instrument(skip(self))]
    pub async fn info(&self, order_id: OrderId) -> Result<OrderInfo, OrderError> {
        let info = if self.routing.use_primary(ReadKind::Order) {
            self.store.info_primary(order_id).await?
        } else {
            self.store.info_replica(order_id).await?
        };

        info.ok_or(OrderError::OrderNotFound(order_id))
    }

    /// Reads the free units for a SKU, routed between primary and
    /// replica.
    #[tracing::instrument(skip(self))]
    pub async fn free_stock(&self, sku: Sku) -> Result<u32, OrderError> {
        let free = if self.routing.use_primary(ReadKind::Stock) {
            self.store.free_primary(sku).await?
        } else {
            self.store.free_replica(sku).await?
        };

        Ok(free)
    }

    /// Removes an order entirely. Test/cleanup tooling only; live orders
    /// end in a terminal status instead.
    pub async fn delete(&self, order_id: OrderId) -> Result<(), OrderError> {
        self.store.delete(order_id).await?;
        Ok(())
    }
}
