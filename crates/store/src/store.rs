use async_trait::async_trait;
use common::{CartId, CartLineId, CustomerId, OrderId, Page, ProductId, SessionToken};

use crate::{
    Brand, Cart, CartLine, CartOwner, Category, Customer, LineMutation, NewCartLine, Order,
    OrderStatus, PlaceOrder, Product, ProductQuery, Result,
};

/// Read-only access to the product catalog.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Returns the product with its current price, stock and availability.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Lists available products matching the query, one page at a time.
    async fn search_products(&self, query: &ProductQuery) -> Result<Page<Product>>;

    async fn list_categories(&self) -> Result<Vec<Category>>;

    async fn list_brands(&self) -> Result<Vec<Brand>>;
}

/// Maps authenticated principals to customer records.
///
/// Registration and login live with the external identity provider; the
/// storefront only reads the link it maintains.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Returns the customer linked to the principal, or None for unknown or
    /// unlinked principals.
    async fn resolve_customer(&self, principal: &str) -> Result<Option<CustomerId>>;

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>>;
}

/// Cart persistence.
///
/// Every operation that changes a cart or its lines bumps the cart version.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Loads a cart by id with its lines.
    async fn get_cart(&self, cart_id: CartId) -> Result<Option<Cart>>;

    /// Loads the cart keyed by the owner, if one exists.
    async fn find_cart(&self, owner: &CartOwner) -> Result<Option<Cart>>;

    /// Returns the owner's cart, creating an empty one if absent.
    ///
    /// Never creates a second cart for the same owner.
    async fn get_or_create_cart(&self, owner: &CartOwner) -> Result<Cart>;

    /// Re-keys the session's cart to the customer in one atomic update.
    ///
    /// Only applies when the session cart has at least one line and the
    /// customer has no cart yet. Returns the re-keyed cart, or None if
    /// nothing was claimed.
    async fn claim_session_cart(
        &self,
        token: &SessionToken,
        customer_id: CustomerId,
    ) -> Result<Option<Cart>>;

    /// Deletes the session's cart if it has no lines. Returns true if a cart
    /// was deleted.
    async fn discard_empty_session_cart(&self, token: &SessionToken) -> Result<bool>;

    /// Moves every line of the session's cart into `into`, summing lines with
    /// the same (product, size, color), then deletes the session cart. Runs as
    /// one transaction. Returns the number of lines moved.
    async fn absorb_session_cart(&self, token: &SessionToken, into: CartId) -> Result<usize>;

    /// Adds a line, or increases the quantity of the line with the same
    /// (product, size, color).
    async fn add_line(&self, cart_id: CartId, line: NewCartLine) -> Result<CartLine>;

    /// Sets the quantity of a line that must belong to `cart_id`.
    async fn set_line_quantity(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<LineMutation>;

    /// Deletes a line that must belong to `cart_id`.
    async fn remove_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<LineMutation>;

    /// Deletes every line of the cart. The cart itself is kept.
    async fn clear_cart(&self, cart_id: CartId) -> Result<()>;
}

/// Order persistence.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Commits a checkout as one atomic unit.
    ///
    /// Within a single transaction: verifies the cart version, inserts the
    /// order and its lines, decrements stock for every product only where the
    /// product is still available, has enough stock and has the same price,
    /// and deletes the cart's lines. Any failure leaves no trace.
    async fn place_order(&self, request: PlaceOrder) -> Result<Order>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists a customer's orders, newest first.
    async fn list_orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>>;

    /// Sets the status to `to` if it is currently `from`. Returns false if the
    /// order is missing or its status was not `from`.
    async fn update_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool>;
}

/// Everything the storefront services need from a backend.
pub trait Storefront:
    CatalogReader + IdentityResolver + CartRepository + OrderRepository + Clone + 'static
{
}

impl<T> Storefront for T where
    T: CatalogReader + IdentityResolver + CartRepository + OrderRepository + Clone + 'static
{
}
