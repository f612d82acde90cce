//! Storage traits and the outbox message record.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Item, OrderId, OrderInfo, OrderStatus, OutboxStatus, Sku, Stock, UserId};

use crate::Result;

/// A pending domain event, written in the same transaction as the order
/// mutation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub id: i64,
    /// Destination bus topic.
    pub topic: String,
    /// Bus partitioning key; set to the order id so all events for one
    /// order are delivered in order.
    pub key: String,
    /// Serialized [`common::OrderStatusEvent`].
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
}

/// Store for order headers and line items.
///
/// Every state-changing call appends the matching outbox event in the
/// same transaction as the order write, so a committed mutation is never
/// observable without its durable event record.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists a new order at [`OrderStatus::New`] with its line items
    /// and returns the assigned id.
    async fn create(&self, user_id: UserId, items: &[Item]) -> Result<OrderId>;

    /// Updates the order status. Legality of the transition is the
    /// caller's responsibility; a missing order is an error so that an
    /// outbox event can never be committed for an order that does not
    /// exist.
    async fn set_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()>;

    /// Reads the order from the primary.
    async fn info_primary(&self, order_id: OrderId) -> Result<Option<OrderInfo>>;

    /// Reads the order from the replica.
    async fn info_replica(&self, order_id: OrderId) -> Result<Option<OrderInfo>>;

    /// Removes the order header and items. Test/cleanup tooling only.
    async fn delete(&self, order_id: OrderId) -> Result<()>;
}

/// Store for per-SKU inventory counters.
#[async_trait]
pub trait StockRepository: Send + Sync {
    /// Reserves capacity for every line item, or for none of them.
    ///
    /// Implementations must read each SKU row under an exclusive lock,
    /// validate all items before writing any, and commit or roll back the
    /// whole set as one unit. A concurrent reservation against any of the
    /// same SKUs blocks until this one resolves. Errors:
    /// [`crate::StorageError::StockInfoNotFound`] for an unknown SKU,
    /// [`crate::StorageError::NoStockForReserve`] when `free < count`
    /// (an exact fit, `free == count`, succeeds).
    async fn reserve(&self, items: &[Item]) -> Result<()>;

    /// Permanently consumes reserved units for paid items: decrements
    /// both `total_count` and `reserved`. All items are released in one
    /// transaction.
    async fn release_on_payment(&self, items: &[Item]) -> Result<()>;

    /// Returns reserved units of cancelled items to the free pool:
    /// decrements only `reserved`. All items are released in one
    /// transaction.
    async fn release_on_cancel(&self, items: &[Item]) -> Result<()>;

    /// Free units (`total_count - reserved`) read from the primary.
    async fn free_primary(&self, sku: Sku) -> Result<u32>;

    /// Free units read from the replica.
    async fn free_replica(&self, sku: Sku) -> Result<u32>;

    /// Creates or replaces a stock row. Seeding and test tooling only.
    async fn put(&self, stock: Stock) -> Result<()>;
}

/// Store for pending domain events.
///
/// Rows are inserted only by [`OrderRepository`] mutations; this trait
/// only moves them through `new → process → sent`.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Returns all `new` messages, atomically marking them `process` so a
    /// second publisher instance cannot claim them again.
    async fn claim_new(&self) -> Result<Vec<OutboxMessage>>;

    /// Marks a message `sent` after the bus acknowledged it.
    async fn mark_sent(&self, id: i64) -> Result<()>;

    /// Requeues `process` messages whose last status change is older than
    /// `older_than` back to `new`, returning how many were requeued.
    /// Redelivery of an already-sent message is possible; loss is not.
    async fn requeue_stuck(&self, older_than: Duration) -> Result<u64>;
}
