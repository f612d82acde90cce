use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    Item, OrderId, OrderInfo, OrderStatus, OrderStatusEvent, OutboxStatus, Sku, Stock, UserId,
};
use tokio::sync::Mutex;

use crate::{
    OrderRepository, OutboxMessage, OutboxRepository, Result, StockRepository, StorageError,
};

struct StoredMessage {
    message: OutboxMessage,
    /// Moment of the last status change, used by the stuck-message reaper.
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    orders: HashMap<OrderId, OrderInfo>,
    next_order_id: i64,
    stocks: HashMap<Sku, Stock>,
    outbox: Vec<StoredMessage>,
    next_outbox_id: i64,
}

impl MemoryInner {
    fn append_outbox(&mut self, topic: &str, order_id: OrderId, status: OrderStatus) -> Result<()> {
        let now = Utc::now();
        let event = OrderStatusEvent::new(order_id, status, now);
        self.next_outbox_id += 1;

        self.outbox.push(StoredMessage {
            message: OutboxMessage {
                id: self.next_outbox_id,
                topic: topic.to_string(),
                key: order_id.to_string(),
                payload: serde_json::to_value(&event)?,
                status: OutboxStatus::New,
                created_at: now,
            },
            updated_at: now,
        });

        Ok(())
    }
}

/// In-memory store for tests and local runs.
///
/// One mutex guards all tables, which makes every operation trivially
/// atomic: an order mutation and its outbox event are appended under the
/// same guard, and a batch reservation validates and writes the whole
/// stock map without any other task observing an intermediate state. This
/// is a coarser lock than the Postgres backend's row locks, but it honors
/// the same contract.
#[derive(Clone, Default)]
pub struct MemoryStore {
    topic: String,
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Creates a new empty store stamping `topic` onto outbox rows.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            inner: Arc::default(),
        }
    }

    /// Returns every outbox message regardless of status, in insertion
    /// order. Test helper.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        let inner = self.inner.lock().await;
        inner.outbox.iter().map(|m| m.message.clone()).collect()
    }

    /// Returns the stock row for `sku`, if any. Test helper.
    pub async fn stock(&self, sku: impl Into<Sku>) -> Option<Stock> {
        let inner = self.inner.lock().await;
        inner.stocks.get(&sku.into()).copied()
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn create(&self, user_id: UserId, items: &[Item]) -> Result<OrderId> {
        let mut inner = self.inner.lock().await;

        inner.next_order_id += 1;
        let order_id = OrderId::new(inner.next_order_id);
        inner.orders.insert(
            order_id,
            OrderInfo {
                user_id,
                status: OrderStatus::New,
                items: items.to_vec(),
            },
        );
        inner.append_outbox(&self.topic, order_id, OrderStatus::New)?;

        Ok(order_id)
    }

    async fn set_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(StorageError::OrderNotFound(order_id))?;
        order.status = status;
        inner.append_outbox(&self.topic, order_id, status)?;

        Ok(())
    }

    async fn info_primary(&self, order_id: OrderId) -> Result<Option<OrderInfo>> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.get(&order_id).cloned())
    }

    async fn info_replica(&self, order_id: OrderId) -> Result<Option<OrderInfo>> {
        // No replication lag to simulate; both roles serve the same map.
        self.info_primary(order_id).await
    }

    async fn delete(&self, order_id: OrderId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.orders.remove(&order_id);
        Ok(())
    }
}

#[async_trait]
impl StockRepository for MemoryStore {
    async fn reserve(&self, items: &[Item]) -> Result<()> {
        let wanted = aggregate_counts(items);
        let mut inner = self.inner.lock().await;

        // Validate every SKU before touching any counter.
        for (&sku, &count) in &wanted {
            let stock = inner
                .stocks
                .get(&sku)
                .ok_or(StorageError::StockInfoNotFound(sku))?;
            if u64::from(stock.free()) < count {
                return Err(StorageError::NoStockForReserve(sku));
            }
        }

        for (&sku, &count) in &wanted {
            if let Some(stock) = inner.stocks.get_mut(&sku) {
                stock.reserved += count as u32;
            }
        }

        Ok(())
    }

    async fn release_on_payment(&self, items: &[Item]) -> Result<()> {
        let wanted = aggregate_counts(items);
        let mut inner = self.inner.lock().await;

        for (&sku, &count) in &wanted {
            let stock = inner
                .stocks
                .get(&sku)
                .ok_or(StorageError::StockSkuNotFound(sku))?;
            if u64::from(stock.reserved) < count {
                return Err(StorageError::ReserveUnderflow(sku));
            }
        }

        for (&sku, &count) in &wanted {
            if let Some(stock) = inner.stocks.get_mut(&sku) {
                stock.total_count -= count as u32;
                stock.reserved -= count as u32;
            }
        }

        Ok(())
    }

    async fn release_on_cancel(&self, items: &[Item]) -> Result<()> {
        let wanted = aggregate_counts(items);
        let mut inner = self.inner.lock().await;

        for (&sku, &count) in &wanted {
            let stock = inner
                .stocks
                .get(&sku)
                .ok_or(StorageError::StockSkuNotFound(sku))?;
            if u64::from(stock.reserved) < count {
                return Err(StorageError::ReserveUnderflow(sku));
            }
        }

        for (&sku, &count) in &wanted {
            if let Some(stock) = inner.stocks.get_mut(&sku) {
                stock.reserved -= count as u32;
            }
        }

        Ok(())
    }

    async fn free_primary(&self, sku: Sku) -> Result<u32> {
        let inner = self.inner.lock().await;
        inner
            .stocks
            .get(&sku)
            .map(Stock::free)
            .ok_or(StorageError::StockSkuNotFound(sku))
    }

    async fn free_replica(&self, sku: Sku) -> Result<u32> {
        self.free_primary(sku).await
    }

    async fn put(&self, stock: Stock) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.stocks.insert(stock.sku, stock);
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for MemoryStore {
    async fn claim_new(&self) -> Result<Vec<OutboxMessage>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let mut claimed = Vec::new();
        for stored in &mut inner.outbox {
            if stored.message.status == OutboxStatus::New {
                stored.message.status = OutboxStatus::Process;
                stored.updated_at = now;
                claimed.push(stored.message.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_sent(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(stored) = inner.outbox.iter_mut().find(|m| m.message.id == id) {
            stored.message.status = OutboxStatus::Sent;
            stored.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn requeue_stuck(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let mut inner = self.inner.lock().await;

        let mut requeued = 0;
        for stored in &mut inner.outbox {
            if stored.message.status == OutboxStatus::Process && stored.updated_at <= cutoff {
                stored.message.status = OutboxStatus::New;
                stored.updated_at = Utc::now();
                requeued += 1;
            }
        }

        Ok(requeued)
    }
}

/// Sums requested counts per SKU. Duplicate SKU lines in one order
/// reserve their combined count.
fn aggregate_counts(items: &[Item]) -> std::collections::BTreeMap<Sku, u64> {
    let mut wanted = std::collections::BTreeMap::new();
    for item in items {
        *wanted.entry(item.sku).or_insert(0u64) += u64::from(item.count);
    }
    wanted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new("order-events")
    }

    #[tokio::test]
    async fn reserve_succeeds_on_exact_fit() {
        let store = store();
        store.put(Stock::new(1, 10, 0)).await.unwrap();

        store.reserve(&[Item::new(1, 10)]).await.unwrap();
        assert_eq!(store.free_primary(Sku::new(1)).await.unwrap(), 0);

        let err = store.reserve(&[Item::new(1, 1)]).await.unwrap_err();
        assert!(matches!(err, StorageError::NoStockForReserve(_)));
    }

    #[tokio::test]
    async fn reserve_is_all_or_nothing() {
        let store = store();
        store.put(Stock::new(5, 10, 0)).await.unwrap();
        store.put(Stock::new(6, 1, 0)).await.unwrap();

        let err = store
            .reserve(&[Item::new(5, 3), Item::new(6, 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoStockForReserve(sku) if sku == Sku::new(6)));

        // Neither counter moved.
        assert_eq!(store.stock(5).await.unwrap().reserved, 0);
        assert_eq!(store.stock(6).await.unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn reserve_unknown_sku_rolls_back() {
        let store = store();
        store.put(Stock::new(5, 10, 0)).await.unwrap();

        let err = store
            .reserve(&[Item::new(5, 3), Item::new(404, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::StockInfoNotFound(sku) if sku == Sku::new(404)));
        assert_eq!(store.stock(5).await.unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn reserve_merges_duplicate_lines() {
        let store = store();
        store.put(Stock::new(1, 10, 0)).await.unwrap();

        store
            .reserve(&[Item::new(1, 3), Item::new(1, 4)])
            .await
            .unwrap();
        assert_eq!(store.stock(1).await.unwrap().reserved, 7);

        let err = store
            .reserve(&[Item::new(1, 2), Item::new(1, 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NoStockForReserve(_)));
        assert_eq!(store.stock(1).await.unwrap().reserved, 7);
    }

    #[tokio::test]
    async fn release_on_payment_consumes_stock() {
        let store = store();
        store.put(Stock::new(1, 10, 4)).await.unwrap();

        store.release_on_payment(&[Item::new(1, 4)]).await.unwrap();

        let stock = store.stock(1).await.unwrap();
        assert_eq!(stock.total_count, 6);
        assert_eq!(stock.reserved, 0);
        assert_eq!(stock.free(), 6);
    }

    #[tokio::test]
    async fn release_on_cancel_returns_stock_to_free_pool() {
        let store = store();
        store.put(Stock::new(1, 10, 4)).await.unwrap();

        store.release_on_cancel(&[Item::new(1, 4)]).await.unwrap();

        let stock = store.stock(1).await.unwrap();
        assert_eq!(stock.total_count, 10);
        assert_eq!(stock.reserved, 0);
        assert_eq!(stock.free(), 10);
    }

    #[tokio::test]
    async fn release_underflow_changes_nothing() {
        let store = store();
        store.put(Stock::new(1, 10, 2)).await.unwrap();
        store.put(Stock::new(2, 10, 5)).await.unwrap();

        let err = store
            .release_on_cancel(&[Item::new(2, 3), Item::new(1, 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ReserveUnderflow(sku) if sku == Sku::new(1)));

        assert_eq!(store.stock(1).await.unwrap().reserved, 2);
        assert_eq!(store.stock(2).await.unwrap().reserved, 5);
    }

    #[tokio::test]
    async fn create_appends_outbox_event_in_same_step() {
        let store = store();
        let order_id = store
            .create(UserId::new(77), &[Item::new(1, 2)])
            .await
            .unwrap();

        let messages = store.outbox_messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, order_id.to_string());
        assert_eq!(messages[0].status, OutboxStatus::New);

        let event: OrderStatusEvent = serde_json::from_value(messages[0].payload.clone()).unwrap();
        assert_eq!(event.order_id, order_id);
        assert_eq!(event.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn set_status_appends_matching_event() {
        let store = store();
        let order_id = store
            .create(UserId::new(77), &[Item::new(1, 2)])
            .await
            .unwrap();

        store
            .set_status(order_id, OrderStatus::AwaitingPayment)
            .await
            .unwrap();

        let messages = store.outbox_messages().await;
        assert_eq!(messages.len(), 2);
        let event: OrderStatusEvent = serde_json::from_value(messages[1].payload.clone()).unwrap();
        assert_eq!(event.status, OrderStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn set_status_on_missing_order_appends_nothing() {
        let store = store();
        let err = store
            .set_status(OrderId::new(404), OrderStatus::Paid)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::OrderNotFound(_)));
        assert!(store.outbox_messages().await.is_empty());
    }

    #[tokio::test]
    async fn claim_marks_messages_process_exactly_once() {
        let store = store();
        store.create(UserId::new(1), &[Item::new(1, 1)]).await.unwrap();

        let claimed = store.claim_new().await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, OutboxStatus::Process);

        // A second publisher instance finds nothing to claim.
        assert!(store.claim_new().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_sent_finishes_the_lifecycle() {
        let store = store();
        store.create(UserId::new(1), &[Item::new(1, 1)]).await.unwrap();

        let claimed = store.claim_new().await.unwrap();
        store.mark_sent(claimed[0].id).await.unwrap();

        let messages = store.outbox_messages().await;
        assert_eq!(messages[0].status, OutboxStatus::Sent);
    }

    #[tokio::test]
    async fn requeue_stuck_returns_process_messages_to_new() {
        let store = store();
        store.create(UserId::new(1), &[Item::new(1, 1)]).await.unwrap();
        store.claim_new().await.unwrap();

        // Zero age: everything at `process` counts as stuck.
        let requeued = store.requeue_stuck(Duration::ZERO).await.unwrap();
        assert_eq!(requeued, 1);
        assert_eq!(store.claim_new().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn requeue_stuck_leaves_fresh_claims_alone() {
        let store = store();
        store.create(UserId::new(1), &[Item::new(1, 1)]).await.unwrap();
        store.claim_new().await.unwrap();

        let requeued = store.requeue_stuck(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(requeued, 0);
        assert!(store.claim_new().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_reserves_never_oversell() {
        let store = store();
        store.put(Stock::new(1, 5, 0)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.reserve(&[Item::new(1, 1)]).await.is_ok()
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 5);
        let stock = store.stock(1).await.unwrap();
        assert_eq!(stock.reserved, 5);
        assert_eq!(stock.free(), 0);
    }
}
