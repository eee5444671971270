//! Checkout / Order Engine.

mod order_number;
mod service;

pub use order_number::{DatedOrderNumbers, OrderNumberGenerator};
pub use service::CheckoutService;

use common::{CartId, CustomerId, ProductId};
use serde::{Deserialize, Serialize};
use store::StoreError;
use thiserror::Error;

/// Longest delivery address accepted at checkout, in characters.
pub const MAX_ADDRESS_LEN: usize = 500;

/// Longest order note accepted at checkout, in characters.
pub const MAX_NOTE_LEN: usize = 1000;

/// Errors raised by checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("No customer record for {0}")]
    CustomerNotFound(CustomerId),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Every generated order number collided with an existing order.
    #[error("Order number {0} is already taken")]
    DuplicateOrderNumber(String),

    /// Stock for the product changed between validation and commit.
    #[error("Stock for product {product_id} changed during checkout, please try again")]
    ConcurrentStockConflict { product_id: ProductId },

    /// The cart changed between validation and commit.
    #[error("Cart {0} changed during checkout, please try again")]
    CartModified(CartId),

    #[error("Invalid checkout request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Short label used for the `outcome` metric label.
    pub fn outcome(&self) -> &'static str {
        match self {
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::CustomerNotFound(_) => "customer_not_found",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::DuplicateOrderNumber(_) => "duplicate_order_number",
            CheckoutError::ConcurrentStockConflict { .. } => "stock_conflict",
            CheckoutError::CartModified(_) => "cart_modified",
            CheckoutError::InvalidRequest(_) => "invalid_request",
            CheckoutError::Store(_) => "store_error",
        }
    }

    /// True for failures where re-running the whole checkout may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CheckoutError::ConcurrentStockConflict { .. } | CheckoutError::CartModified(_)
        )
    }
}

/// Retry bounds for checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// Order numbers tried before a collision is surfaced.
    pub order_number_attempts: u32,
    /// Full re-runs after a stock or cart conflict inside the transaction.
    pub conflict_retries: u32,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            order_number_attempts: 3,
            conflict_retries: 1,
        }
    }
}

/// Delivery details submitted with a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub delivery_address: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl CheckoutRequest {
    pub fn new(delivery_address: impl Into<String>) -> Self {
        Self {
            delivery_address: delivery_address.into(),
            note: None,
        }
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Returns a trimmed copy, or the first rule the request breaks.
    pub fn validated(&self) -> Result<Self, CheckoutError> {
        let address = self.delivery_address.trim();
        if address.is_empty() {
            return Err(CheckoutError::InvalidRequest(
                "delivery address is required".to_string(),
            ));
        }
        if address.chars().count() > MAX_ADDRESS_LEN {
            return Err(CheckoutError::InvalidRequest(format!(
                "delivery address must be at most {MAX_ADDRESS_LEN} characters"
            )));
        }

        let note = self
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        if note.is_some_and(|n| n.chars().count() > MAX_NOTE_LEN) {
            return Err(CheckoutError::InvalidRequest(format!(
                "note must be at most {MAX_NOTE_LEN} characters"
            )));
        }

        Ok(Self {
            delivery_address: address.to_string(),
            note: note.map(str::to_string),
        })
    }
}
