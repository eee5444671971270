//! Storage layer for the storefront.
//!
//! The traits in [`store`] describe what the cart and checkout services need
//! from persistence. Two backends implement them: [`InMemoryStore`] for tests
//! and local runs, and [`PostgresStore`] for production.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use model::{
    Brand, Cart, CartLine, CartOwner, Category, Customer, LineMutation, MAX_LINE_QUANTITY,
    NewCartLine, NewProduct, Order, OrderLine, OrderStatus, PlaceOrder, Product,
};
pub use postgres::PostgresStore;
pub use query::{ProductQuery, ProductSort};
pub use store::{CartRepository, CatalogReader, IdentityResolver, OrderRepository, Storefront};
