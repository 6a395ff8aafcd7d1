use common::{DispatchId, OrderId, StoreId};
use domain::{DomainError, OrderStatus};
use thiserror::Error;

/// Errors that can occur when interacting with the order repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A compare-and-set status transition lost a race.
    /// The order was no longer in the expected status.
    #[error("Status conflict for order {order_id}: expected {expected}, found {actual}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Dispatch not found: {0}")]
    DispatchNotFound(DispatchId),

    /// A dispatch already exists for this order and destination.
    #[error("Dispatch already recorded for order {order_id} at destination {destination}")]
    DispatchExists {
        order_id: OrderId,
        destination: StoreId,
    },

    #[error("Store not found: {0}")]
    StoreNotFound(StoreId),

    /// A stored row violated a domain rule.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The backing store refused or could not take the write.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
