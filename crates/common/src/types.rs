use serde::{Deserialize, Serialize};

use crate::status::OrderStatus;

/// Unique identifier for an order.
///
/// Wraps the surrogate key assigned by the order store so order ids
/// cannot be mixed up with user ids or SKUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Creates an order ID from a raw database key.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying key.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<OrderId> for i64 {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

/// Unique identifier for a user placing orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Stock-keeping unit identifier for a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sku(i64);

impl Sku {
    pub fn new(sku: i64) -> Self {
        Self(sku)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Sku {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Sku {
    fn from(sku: i64) -> Self {
        Self(sku)
    }
}

/// A single order line: a SKU and how many units of it were requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub sku: Sku,
    pub count: u32,
}

impl Item {
    pub fn new(sku: impl Into<Sku>, count: u32) -> Self {
        Self {
            sku: sku.into(),
            count,
        }
    }
}

/// A snapshot of an order: who placed it, where it is in its lifecycle,
/// and its line items (sorted by ascending SKU).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub user_id: UserId,
    pub status: OrderStatus,
    pub items: Vec<Item>,
}

/// Per-SKU inventory counters.
///
/// Invariant: `0 <= reserved <= total_count`. `total_count` is the
/// capacity ever made available; `reserved` is what is currently held
/// for unpaid orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub sku: Sku,
    pub total_count: u32,
    pub reserved: u32,
}

impl Stock {
    pub fn new(sku: impl Into<Sku>, total_count: u32, reserved: u32) -> Self {
        Self {
            sku: sku.into(),
            total_count,
            reserved,
        }
    }

    /// Units available for new reservations.
    pub fn free(&self) -> u32 {
        self.total_count.saturating_sub(self.reserved)
    }
}
