use chrono::{DateTime, Utc};
use common::{CartId, CartLineId, CustomerId, ProductId, SessionToken};
use serde::{Deserialize, Serialize};

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_QUANTITY: u32 = 10_000;

/// Who a cart belongs to.
///
/// A cart is keyed by exactly one of the two; merging re-keys a session cart
/// to a customer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    Session(SessionToken),
    Customer(CustomerId),
}

impl CartOwner {
    pub fn session_token(&self) -> Option<&SessionToken> {
        match self {
            CartOwner::Session(token) => Some(token),
            CartOwner::Customer(_) => None,
        }
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        match self {
            CartOwner::Session(_) => None,
            CartOwner::Customer(id) => Some(*id),
        }
    }
}

/// A shopping cart with its lines loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub owner: CartOwner,
    /// Incremented on every change to the cart or its lines.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<CartLine>,
}

impl Cart {
    /// Creates an empty cart for the given owner.
    pub fn new(owner: CartOwner) -> Self {
        let now = Utc::now();
        Self {
            id: CartId::new(),
            owner,
            version: 0,
            created_at: now,
            updated_at: now,
            lines: Vec::new(),
        }
    }

    /// Sum of all line quantities.
    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, line_id: CartLineId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    /// Finds the line holding the given (product, size, color) combination.
    pub fn matching_line(
        &self,
        product_id: ProductId,
        selected_size: Option<&str>,
        selected_color: Option<&str>,
    ) -> Option<&CartLine> {
        self.lines
            .iter()
            .find(|l| l.matches(product_id, selected_size, selected_color))
    }

    /// Marks the cart as changed.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// One (product, size, color, quantity) entry in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub selected_size: Option<String>,
    pub selected_color: Option<String>,
}

impl CartLine {
    /// Returns true if this line has the same identity as the given tuple.
    pub fn matches(
        &self,
        product_id: ProductId,
        selected_size: Option<&str>,
        selected_color: Option<&str>,
    ) -> bool {
        self.product_id == product_id
            && self.selected_size.as_deref() == selected_size
            && self.selected_color.as_deref() == selected_color
    }
}

/// A line to add to a cart. Merged into an existing line with the same
/// (product, size, color) identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCartLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub selected_size: Option<String>,
    pub selected_color: Option<String>,
}

impl NewCartLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
            selected_size: None,
            selected_color: None,
        }
    }

    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.selected_size = Some(size.into());
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.selected_color = Some(color.into());
        self
    }
}

/// Outcome of mutating a single cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMutation {
    /// The line belonged to the cart and was changed.
    Applied,
    /// No line with that id exists.
    Missing,
    /// The line exists but belongs to a different cart.
    OwnedElsewhere,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(cart: &Cart, product_id: ProductId, qty: u32, size: Option<&str>) -> CartLine {
        CartLine {
            id: CartLineId::new(),
            cart_id: cart.id,
            product_id,
            quantity: qty,
            selected_size: size.map(String::from),
            selected_color: None,
        }
    }

    #[test]
    fn item_count_sums_quantities() {
        let mut cart = Cart::new(CartOwner::Session(SessionToken::generate()));
        let product = ProductId::new();
        cart.lines.push(line(&cart, product, 2, None));
        cart.lines.push(line(&cart, product, 3, Some("M")));
        assert_eq!(cart.item_count(), 5);
    }

    #[test]
    fn matching_line_compares_full_tuple() {
        let mut cart = Cart::new(CartOwner::Customer(CustomerId::new()));
        let product = ProductId::new();
        cart.lines.push(line(&cart, product, 1, Some("M")));

        assert!(cart.matching_line(product, Some("M"), None).is_some());
        assert!(cart.matching_line(product, Some("L"), None).is_none());
        assert!(cart.matching_line(product, None, None).is_none());
        assert!(cart.matching_line(product, Some("M"), Some("red")).is_none());
    }

    #[test]
    fn touch_bumps_version() {
        let mut cart = Cart::new(CartOwner::Session(SessionToken::generate()));
        let before = cart.updated_at;
        cart.touch();
        assert_eq!(cart.version, 1);
        assert!(cart.updated_at >= before);
    }

    #[test]
    fn owner_accessors() {
        let token = SessionToken::generate();
        let owner = CartOwner::Session(token.clone());
        assert_eq!(owner.session_token(), Some(&token));
        assert_eq!(owner.customer_id(), None);

        let customer = CustomerId::new();
        let owner = CartOwner::Customer(customer);
        assert_eq!(owner.customer_id(), Some(customer));
        assert!(owner.session_token().is_none());
    }
}
