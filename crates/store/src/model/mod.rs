//! Records persisted by the store.

mod cart;
mod catalog;
mod customer;
mod order;

pub use cart::{Cart, CartLine, CartOwner, LineMutation, MAX_LINE_QUANTITY, NewCartLine};
pub use catalog::{Brand, Category, NewProduct, Product};
pub use customer::Customer;
pub use order::{Order, OrderLine, OrderStatus, PlaceOrder};
