//! Durable stores for orders, stocks, and the transactional outbox.
//!
//! Three async traits describe the storage contract ([`OrderRepository`],
//! [`StockRepository`], [`OutboxRepository`]); [`PgStore`] implements them
//! against a master/replica PostgreSQL pair and [`MemoryStore`] against
//! mutex-guarded maps for tests and local runs. Both backends honor the
//! same atomicity contract: an order mutation and its outbox event commit
//! together, and a batch reservation validates every row under exclusive
//! locks before writing any.

mod error;
mod memory;
mod postgres;
mod store;

pub use error::{Result, StorageError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use common::OutboxStatus;
pub use store::{OrderRepository, OutboxMessage, OutboxRepository, StockRepository};
