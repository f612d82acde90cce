//! Shared model types for the order management system.
//!
//! Everything that the storage, domain, and relay crates agree on lives
//! here: identifier newtypes, order line items, the order status machine,
//! and the outbox event payload.

mod event;
mod status;
mod types;

pub use event::OrderStatusEvent;
pub use status::{InvalidStatus, OrderStatus, OutboxStatus};
pub use types::{Item, OrderId, OrderInfo, Sku, Stock, UserId};
