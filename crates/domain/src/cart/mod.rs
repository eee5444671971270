//! Cart Store: session and customer carts.

mod service;

pub use service::CartService;

use common::{CartId, CartLineId, ProductId};
use serde::{Deserialize, Serialize};
use store::{MAX_LINE_QUANTITY, StoreError};
use thiserror::Error;

/// What happens to an anonymous cart when its shopper signs in while a
/// customer cart already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Sum the anonymous lines into the customer cart and delete the
    /// anonymous cart.
    #[default]
    AbsorbLines,
    /// Leave the anonymous cart untouched.
    KeepSeparate,
}

impl std::str::FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "absorb" | "absorb_lines" => Ok(MergePolicy::AbsorbLines),
            "keep" | "keep_separate" => Ok(MergePolicy::KeepSeparate),
            other => Err(format!("unknown cart merge policy: {other}")),
        }
    }
}

/// Errors raised by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    #[error("Product {0} does not exist or is not available")]
    ProductUnavailable(ProductId),

    #[error("Invalid quantity {0}: must be between 1 and {max}", max = MAX_LINE_QUANTITY)]
    InvalidQuantity(i64),

    /// The line already holds so much that adding more would pass the limit.
    #[error(
        "Quantity for product {product_id} would exceed the per-line limit of {}",
        MAX_LINE_QUANTITY
    )]
    QuantityLimit { product_id: ProductId },

    /// The line exists but belongs to a different cart than the caller's.
    #[error("Cart line {line_id} does not belong to cart {cart_id}")]
    NotOwnedByCaller { cart_id: CartId, line_id: CartLineId },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CartError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QuantityLimit { product_id } => CartError::QuantityLimit { product_id },
            other => CartError::Store(other),
        }
    }
}
