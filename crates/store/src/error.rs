use common::{CartId, ProductId};

use crate::MAX_LINE_QUANTITY;
use thiserror::Error;

/// Errors that can occur when interacting with the storefront store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order number is already taken by another order.
    #[error("Order number already exists: {0}")]
    DuplicateOrderNumber(String),

    /// A guarded stock decrement did not apply: the product ran out, was
    /// disabled, or changed price after it was validated.
    #[error("Stock conflict for product {product_id}")]
    StockConflict { product_id: ProductId },

    /// The cart changed between being read and being checked out.
    #[error("Cart {cart_id} was modified: expected version {expected}, found {actual}")]
    CartModified {
        cart_id: CartId,
        expected: i64,
        actual: i64,
    },

    /// Adding to a line would take it past [`MAX_LINE_QUANTITY`].
    #[error(
        "Quantity for product {product_id} would exceed the per-line limit of {}",
        MAX_LINE_QUANTITY
    )]
    QuantityLimit { product_id: ProductId },

    /// The cart does not exist.
    #[error("Cart not found: {0}")]
    CartNotFound(CartId),

    /// A persisted value could not be mapped back into a record.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The backing store cannot serve the request right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true if retrying the same operation might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateOrderNumber(_)
                | StoreError::StockConflict { .. }
                | StoreError::CartModified { .. }
                | StoreError::Unavailable(_)
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
