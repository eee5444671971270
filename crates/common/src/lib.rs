//! Shared types for the storefront crates.

mod ids;
mod money;
mod page;

pub use ids::{
    BrandId, CartId, CartLineId, CategoryId, CustomerId, OrderId, OrderLineId, ProductId,
    SessionToken,
};
pub use money::Money;
pub use page::Page;
