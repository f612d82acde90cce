use common::{InvalidStatus, OrderId, Sku};
use thiserror::Error;

/// Errors that can occur when interacting with the stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The order does not exist.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// No stock row exists for the SKU (read path).
    #[error("no stock record for sku {0}")]
    StockSkuNotFound(Sku),

    /// No stock row exists for a SKU inside a batch reservation.
    #[error("no stock record for sku {0} during reservation")]
    StockInfoNotFound(Sku),

    /// The SKU does not have enough free units for the requested count.
    #[error("not enough free stock to reserve sku {0}")]
    NoStockForReserve(Sku),

    /// Releasing more units than are currently reserved.
    #[error("reserved counter underflow for sku {0}")]
    ReserveUnderflow(Sku),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored status string is not part of the closed enumeration.
    #[error(transparent)]
    Status(#[from] InvalidStatus),

    /// A stored counter does not fit the model type.
    #[error("stored value out of range: {0}")]
    Decode(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
