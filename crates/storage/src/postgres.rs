use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    Item, OrderId, OrderInfo, OrderStatus, OrderStatusEvent, OutboxStatus, Sku, Stock, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    OrderRepository, OutboxMessage, OutboxRepository, Result, StockRepository, StorageError,
};

/// PostgreSQL-backed store.
///
/// Writes always go to the master pool; `*_replica` reads go to the
/// replica pool. For single-node deployments both pools may point at the
/// same server.
#[derive(Clone)]
pub struct PgStore {
    master: PgPool,
    replica: PgPool,
    topic: String,
}

impl PgStore {
    /// Creates a new store over a master/replica pool pair. `topic` is
    /// the bus topic stamped onto every outbox row.
    pub fn new(master: PgPool, replica: PgPool, topic: impl Into<String>) -> Self {
        Self {
            master,
            replica,
            topic: topic.into(),
        }
    }

    /// Gets a reference to the master connection pool.
    pub fn master(&self) -> &PgPool {
        &self.master
    }

    /// Runs the database migrations against the master.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.master).await
    }

    /// Inserts the outbox event for an order mutation into the same
    /// transaction as the mutation itself.
    async fn append_outbox(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<()> {
        let event = OrderStatusEvent::new(order_id, status, Utc::now());
        let payload = serde_json::to_value(&event)?;

        sqlx::query("INSERT INTO outbox (topic, key, payload) VALUES ($1, $2, $3)")
            .bind(&self.topic)
            .bind(order_id.to_string())
            .bind(payload)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    async fn info_on(pool: &PgPool, order_id: OrderId) -> Result<Option<OrderInfo>> {
        let header = sqlx::query("SELECT user_id, status FROM orders WHERE id = $1")
            .bind(order_id.as_i64())
            .fetch_optional(pool)
            .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let user_id: i64 = header.try_get("user_id")?;
        let status: String = header.try_get("status")?;
        let status: OrderStatus = status.parse()?;

        let rows = sqlx::query("SELECT sku, count FROM order_items WHERE order_id = $1 ORDER BY sku")
            .bind(order_id.as_i64())
            .fetch_all(pool)
            .await?;

        let items = rows
            .into_iter()
            .map(row_to_item)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(OrderInfo {
            user_id: UserId::new(user_id),
            status,
            items,
        }))
    }

    async fn free_on(pool: &PgPool, sku: Sku) -> Result<u32> {
        let row = sqlx::query("SELECT total_count, reserved FROM stocks WHERE sku = $1")
            .bind(sku.as_i64())
            .fetch_optional(pool)
            .await?;

        let Some(row) = row else {
            return Err(StorageError::StockSkuNotFound(sku));
        };

        let total: i64 = row.try_get("total_count")?;
        let reserved: i64 = row.try_get("reserved")?;

        to_count(total.saturating_sub(reserved), sku)
    }

    /// Locks the stock row for `sku` and returns its counters, or
    /// `missing(sku)` if no row exists.
    async fn lock_stock(
        tx: &mut Transaction<'_, Postgres>,
        sku: Sku,
        missing: fn(Sku) -> StorageError,
    ) -> Result<(i64, i64)> {
        let row = sqlx::query("SELECT total_count, reserved FROM stocks WHERE sku = $1 FOR UPDATE")
            .bind(sku.as_i64())
            .fetch_optional(&mut **tx)
            .await?;

        let Some(row) = row else {
            return Err(missing(sku));
        };

        let total: i64 = row.try_get("total_count")?;
        let reserved: i64 = row.try_get("reserved")?;
        Ok((total, reserved))
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    #[tracing::instrument(skip(self, items), fields(user_id = %user_id))]
    async fn create(&self, user_id: UserId, items: &[Item]) -> Result<OrderId> {
        metrics::counter!("storage_requests_total", "op" => "order_create").increment(1);

        let mut tx = self.master.begin().await?;

        let id: i64 =
            sqlx::query_scalar("INSERT INTO orders (user_id, status) VALUES ($1, $2) RETURNING id")
                .bind(user_id.as_i64())
                .bind(OrderStatus::New.as_str())
                .fetch_one(&mut *tx)
                .await?;
        let order_id = OrderId::new(id);

        for item in items {
            sqlx::query("INSERT INTO order_items (order_id, sku, count) VALUES ($1, $2, $3)")
                .bind(id)
                .bind(item.sku.as_i64())
                .bind(i64::from(item.count))
                .execute(&mut *tx)
                .await?;
        }

        self.append_outbox(&mut tx, order_id, OrderStatus::New).await?;
        tx.commit().await?;

        Ok(order_id)
    }

    #[tracing::instrument(skip(self))]
    async fn set_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        metrics::counter!("storage_requests_total", "op" => "order_set_status").increment(1);

        let mut tx = self.master.begin().await?;

        let result = sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(order_id.as_i64())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::OrderNotFound(order_id));
        }

        self.append_outbox(&mut tx, order_id, status).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn info_primary(&self, order_id: OrderId) -> Result<Option<OrderInfo>> {
        Self::info_on(&self.master, order_id).await
    }

    async fn info_replica(&self, order_id: OrderId) -> Result<Option<OrderInfo>> {
        Self::info_on(&self.replica, order_id).await
    }

    async fn delete(&self, order_id: OrderId) -> Result<()> {
        let mut tx = self.master.begin().await?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id.as_i64())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_i64())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl StockRepository for PgStore {
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn reserve(&self, items: &[Item]) -> Result<()> {
        metrics::counter!("storage_requests_total", "op" => "stock_reserve").increment(1);

        let wanted = aggregate_counts(items);
        let mut tx = self.master.begin().await?;

        // Rows are locked in ascending SKU order so two concurrent
        // multi-item reservations cannot deadlock on each other.
        let mut updates: Vec<(Sku, i64)> = Vec::with_capacity(wanted.len());
        for (&sku, &count) in &wanted {
            let (total, reserved) =
                Self::lock_stock(&mut tx, sku, StorageError::StockInfoNotFound).await?;

            if total - reserved < count {
                return Err(StorageError::NoStockForReserve(sku));
            }
            updates.push((sku, reserved + count));
        }

        // All items validated; only now touch any row.
        for (sku, new_reserved) in updates {
            sqlx::query("UPDATE stocks SET reserved = $1 WHERE sku = $2")
                .bind(new_reserved)
                .bind(sku.as_i64())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn release_on_payment(&self, items: &[Item]) -> Result<()> {
        metrics::counter!("storage_requests_total", "op" => "stock_release_payment").increment(1);

        let wanted = aggregate_counts(items);
        let mut tx = self.master.begin().await?;

        for (&sku, &count) in &wanted {
            let (total, reserved) =
                Self::lock_stock(&mut tx, sku, StorageError::StockSkuNotFound).await?;
            if reserved < count {
                return Err(StorageError::ReserveUnderflow(sku));
            }

            sqlx::query("UPDATE stocks SET total_count = $1, reserved = $2 WHERE sku = $3")
                .bind(total - count)
                .bind(reserved - count)
                .bind(sku.as_i64())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn release_on_cancel(&self, items: &[Item]) -> Result<()> {
        metrics::counter!("storage_requests_total", "op" => "stock_release_cancel").increment(1);

        let wanted = aggregate_counts(items);
        let mut tx = self.master.begin().await?;

        for (&sku, &count) in &wanted {
            let (_, reserved) =
                Self::lock_stock(&mut tx, sku, StorageError::StockSkuNotFound).await?;
            if reserved < count {
                return Err(StorageError::ReserveUnderflow(sku));
            }

            sqlx::query("UPDATE stocks SET reserved = $1 WHERE sku = $2")
                .bind(reserved - count)
                .bind(sku.as_i64())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn free_primary(&self, sku: Sku) -> Result<u32> {
        Self::free_on(&self.master, sku).await
    }

    async fn free_replica(&self, sku: Sku) -> Result<u32> {
        Self::free_on(&self.replica, sku).await
    }

    async fn put(&self, stock: Stock) -> Result<()> {
        sqlx::query(
            "INSERT INTO stocks (sku, total_count, reserved) VALUES ($1, $2, $3) \
             ON CONFLICT (sku) DO UPDATE \
             SET total_count = EXCLUDED.total_count, reserved = EXCLUDED.reserved",
        )
        .bind(stock.sku.as_i64())
        .bind(i64::from(stock.total_count))
        .bind(i64::from(stock.reserved))
        .execute(&self.master)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for PgStore {
    async fn claim_new(&self) -> Result<Vec<OutboxMessage>> {
        let mut tx = self.master.begin().await?;

        let rows = sqlx::query(
            "SELECT id, topic, key, payload, status, created_at \
             FROM outbox WHERE status = $1 ORDER BY id",
        )
        .bind(OutboxStatus::New.as_str())
        .fetch_all(&mut *tx)
        .await?;

        let mut messages = rows
            .into_iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>>>()?;

        if !messages.is_empty() {
            let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
            sqlx::query("UPDATE outbox SET status = $1, updated_at = now() WHERE id = ANY($2)")
                .bind(OutboxStatus::Process.as_str())
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        for message in &mut messages {
            message.status = OutboxStatus::Process;
        }
        Ok(messages)
    }

    async fn mark_sent(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE outbox SET status = $1, updated_at = now() WHERE id = $2")
            .bind(OutboxStatus::Sent.as_str())
            .bind(id)
            .execute(&self.master)
            .await?;

        Ok(())
    }

    async fn requeue_stuck(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;

        let result = sqlx::query(
            "UPDATE outbox SET status = $1, updated_at = now() \
             WHERE status = $2 AND updated_at < $3",
        )
        .bind(OutboxStatus::New.as_str())
        .bind(OutboxStatus::Process.as_str())
        .bind(cutoff)
        .execute(&self.master)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Sums requested counts per SKU, in ascending SKU order. Duplicate SKU
/// lines in one order reserve their combined count.
fn aggregate_counts(items: &[Item]) -> BTreeMap<Sku, i64> {
    let mut wanted: BTreeMap<Sku, i64> = BTreeMap::new();
    for item in items {
        *wanted.entry(item.sku).or_default() += i64::from(item.count);
    }
    wanted
}

fn to_count(value: i64, sku: Sku) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::Decode(format!("count {value} for sku {sku} exceeds u32")))
}

fn row_to_item(row: PgRow) -> Result<Item> {
    let sku: i64 = row.try_get("sku")?;
    let sku = Sku::new(sku);
    let count: i64 = row.try_get("count")?;
    Ok(Item::new(sku, to_count(count, sku)?))
}

fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
    let status: String = row.try_get("status")?;
    Ok(OutboxMessage {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        key: row.try_get("key")?,
        payload: row.try_get("payload")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
    })
}
