//! Storefront services.
//!
//! This crate holds the rules that sit between the HTTP layer and storage:
//! - [`CartService`]: session and customer carts, including the merge that
//!   happens when an anonymous shopper signs in
//! - [`CheckoutService`]: turns a customer's cart into an order, validating
//!   stock first and committing order, stock and cart in one unit
//! - [`OrderService`]: order history and status transitions

pub mod cart;
pub mod checkout;
pub mod identity;
pub mod orders;

pub use cart::{CartError, CartService, MergePolicy};
pub use checkout::{
    CheckoutConfig, CheckoutError, CheckoutRequest, CheckoutService, DatedOrderNumbers,
    OrderNumberGenerator,
};
pub use identity::Identity;
pub use orders::{OrderError, OrderService};
