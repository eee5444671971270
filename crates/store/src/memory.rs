use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    BrandId, CartId, CartLineId, CategoryId, CustomerId, Money, OrderId, Page, ProductId,
    SessionToken,
};
use tokio::sync::RwLock;

use crate::{
    Brand, Cart, CartLine, CartOwner, Category, Customer, LineMutation, MAX_LINE_QUANTITY,
    NewCartLine, NewProduct, Order, OrderStatus, PlaceOrder, Product, ProductQuery, Result, StoreError,
    store::{CartRepository, CatalogReader, IdentityResolver, OrderRepository},
};

#[derive(Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    categories: Vec<Category>,
    brands: Vec<Brand>,
    customers: HashMap<CustomerId, Customer>,
    principals: HashMap<String, CustomerId>,
    carts: HashMap<CartId, Cart>,
    orders: Vec<Order>,
    fail_on_place_order: bool,
}

impl MemoryState {
    fn cart_id_for(&self, owner: &CartOwner) -> Option<CartId> {
        self.carts
            .values()
            .find(|c| &c.owner == owner)
            .map(|c| c.id)
    }

    fn line_owner(&self, line_id: CartLineId) -> Option<CartId> {
        self.carts
            .values()
            .find(|c| c.line(line_id).is_some())
            .map(|c| c.id)
    }
}

/// What to do when a merged line would pass [`MAX_LINE_QUANTITY`].
#[derive(Clone, Copy)]
enum OnLimit {
    Reject,
    Clamp,
}

/// Merges a line into the cart, summing with an existing line of the same
/// identity.
fn merge_line(cart: &mut Cart, line: NewCartLine, on_limit: OnLimit) -> Result<CartLine> {
    let current = cart.lines.iter().position(|l| {
        l.matches(
            line.product_id,
            line.selected_size.as_deref(),
            line.selected_color.as_deref(),
        )
    });
    let existing = current.map_or(0, |i| cart.lines[i].quantity);

    let quantity = match existing.checked_add(line.quantity) {
        Some(total) if total <= MAX_LINE_QUANTITY => total,
        _ => match on_limit {
            OnLimit::Clamp => MAX_LINE_QUANTITY,
            OnLimit::Reject => {
                return Err(StoreError::QuantityLimit {
                    product_id: line.product_id,
                });
            }
        },
    };

    match current {
        Some(i) => {
            cart.lines[i].quantity = quantity;
            Ok(cart.lines[i].clone())
        }
        None => {
            let created = CartLine {
                id: CartLineId::new(),
                cart_id: cart.id,
                product_id: line.product_id,
                quantity,
                selected_size: line.selected_size,
                selected_color: line.selected_color,
            };
            cart.lines.push(created.clone());
            Ok(created)
        }
    }
}

/// In-memory store implementation for tests and local runs.
///
/// All state sits behind one lock, so every operation, including checkout,
/// is atomic with respect to every other.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_category(&self, name: impl Into<String>) -> Category {
        let category = Category {
            id: CategoryId::new(),
            name: name.into(),
            description: None,
        };
        self.state.write().await.categories.push(category.clone());
        category
    }

    pub async fn insert_brand(&self, name: impl Into<String>) -> Brand {
        let brand = Brand {
            id: BrandId::new(),
            name: name.into(),
            description: None,
            logo_url: None,
        };
        self.state.write().await.brands.push(brand.clone());
        brand
    }

    pub async fn insert_product(&self, product: NewProduct) -> Product {
        let product = product.into_product(Utc::now());
        self.state
            .write()
            .await
            .products
            .insert(product.id, product.clone());
        product
    }

    /// Stores a customer and links it to the given principal.
    pub async fn insert_customer(&self, principal: impl Into<String>, customer: Customer) {
        let mut state = self.state.write().await;
        state.principals.insert(principal.into(), customer.id);
        state.customers.insert(customer.id, customer);
    }

    /// Registers a principal with no linked customer record.
    pub async fn insert_unlinked_principal(&self, principal: impl Into<String>) -> CustomerId {
        let customer_id = CustomerId::new();
        self.state
            .write()
            .await
            .principals
            .insert(principal.into(), customer_id);
        customer_id
    }

    pub async fn set_product_price(&self, id: ProductId, price: Money) {
        if let Some(product) = self.state.write().await.products.get_mut(&id) {
            product.price = price;
        }
    }

    pub async fn set_product_stock(&self, id: ProductId, stock: u32) {
        if let Some(product) = self.state.write().await.products.get_mut(&id) {
            product.stock = stock;
        }
    }

    pub async fn set_product_available(&self, id: ProductId, available: bool) {
        if let Some(product) = self.state.write().await.products.get_mut(&id) {
            product.is_available = available;
        }
    }

    /// Makes every `place_order` call fail as if storage were down.
    pub async fn set_fail_on_place_order(&self, fail: bool) {
        self.state.write().await.fail_on_place_order = fail;
    }

    /// Inserts an order directly, bypassing checkout.
    pub async fn insert_order(&self, order: Order) {
        self.state.write().await.orders.push(order);
    }

    pub async fn cart_count(&self) -> usize {
        self.state.read().await.carts.len()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl CatalogReader for InMemoryStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn search_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let query = query.normalized();
        let state = self.state.read().await;

        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        query.sort_products(&mut products);

        let total = products.len() as u64;
        let items = products
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size as usize)
            .collect();

        Ok(Page::new(items, query.page, query.page_size, total))
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let mut categories = self.state.read().await.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn list_brands(&self) -> Result<Vec<Brand>> {
        let mut brands = self.state.read().await.brands.clone();
        brands.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(brands)
    }
}

#[async_trait]
impl IdentityResolver for InMemoryStore {
    async fn resolve_customer(&self, principal: &str) -> Result<Option<CustomerId>> {
        Ok(self.state.read().await.principals.get(principal).copied())
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        Ok(self.state.read().await.customers.get(&id).cloned())
    }
}

#[async_trait]
impl CartRepository for InMemoryStore {
    async fn get_cart(&self, cart_id: CartId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&cart_id).cloned())
    }

    async fn find_cart(&self, owner: &CartOwner) -> Result<Option<Cart>> {
        let state = self.state.read().await;
        Ok(state
            .cart_id_for(owner)
            .and_then(|id| state.carts.get(&id))
            .cloned())
    }

    async fn get_or_create_cart(&self, owner: &CartOwner) -> Result<Cart> {
        let mut state = self.state.write().await;
        if let Some(id) = state.cart_id_for(owner)
            && let Some(cart) = state.carts.get(&id)
        {
            return Ok(cart.clone());
        }

        let cart = Cart::new(owner.clone());
        state.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn claim_session_cart(
        &self,
        token: &SessionToken,
        customer_id: CustomerId,
    ) -> Result<Option<Cart>> {
        let mut state = self.state.write().await;

        if state
            .cart_id_for(&CartOwner::Customer(customer_id))
            .is_some()
        {
            return Ok(None);
        }
        let Some(id) = state.cart_id_for(&CartOwner::Session(token.clone())) else {
            return Ok(None);
        };
        let Some(cart) = state.carts.get_mut(&id) else {
            return Ok(None);
        };
        if cart.is_empty() {
            return Ok(None);
        }

        cart.owner = CartOwner::Customer(customer_id);
        cart.touch();
        Ok(Some(cart.clone()))
    }

    async fn discard_empty_session_cart(&self, token: &SessionToken) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(id) = state.cart_id_for(&CartOwner::Session(token.clone())) else {
            return Ok(false);
        };
        if state.carts.get(&id).is_some_and(Cart::is_empty) {
            state.carts.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn absorb_session_cart(&self, token: &SessionToken, into: CartId) -> Result<usize> {
        let mut state = self.state.write().await;

        if !state.carts.contains_key(&into) {
            return Err(StoreError::CartNotFound(into));
        }
        let Some(source_id) = state.cart_id_for(&CartOwner::Session(token.clone())) else {
            return Ok(0);
        };
        if source_id == into {
            return Ok(0);
        }
        let Some(source) = state.carts.remove(&source_id) else {
            return Ok(0);
        };

        let moved = source.lines.len();
        if let Some(target) = state.carts.get_mut(&into) {
            for line in source.lines {
                merge_line(
                    target,
                    NewCartLine {
                        product_id: line.product_id,
                        quantity: line.quantity,
                        selected_size: line.selected_size,
                        selected_color: line.selected_color,
                    },
                    OnLimit::Clamp,
                )?;
            }
            if moved > 0 {
                target.touch();
            }
        }
        Ok(moved)
    }

    async fn add_line(&self, cart_id: CartId, line: NewCartLine) -> Result<CartLine> {
        let mut state = self.state.write().await;
        let cart = state
            .carts
            .get_mut(&cart_id)
            .ok_or(StoreError::CartNotFound(cart_id))?;

        let line = merge_line(cart, line, OnLimit::Reject)?;
        cart.touch();
        Ok(line)
    }

    async fn set_line_quantity(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<LineMutation> {
        let mut state = self.state.write().await;
        match state.line_owner(line_id) {
            None => Ok(LineMutation::Missing),
            Some(owner) if owner != cart_id => Ok(LineMutation::OwnedElsewhere),
            Some(_) => {
                if let Some(cart) = state.carts.get_mut(&cart_id) {
                    if let Some(line) = cart.lines.iter_mut().find(|l| l.id == line_id) {
                        if quantity > MAX_LINE_QUANTITY {
                            return Err(StoreError::QuantityLimit {
                                product_id: line.product_id,
                            });
                        }
                        line.quantity = quantity;
                    }
                    cart.touch();
                }
                Ok(LineMutation::Applied)
            }
        }
    }

    async fn remove_line(&self, cart_id: CartId, line_id: CartLineId) -> Result<LineMutation> {
        let mut state = self.state.write().await;
        match state.line_owner(line_id) {
            None => Ok(LineMutation::Missing),
            Some(owner) if owner != cart_id => Ok(LineMutation::OwnedElsewhere),
            Some(_) => {
                if let Some(cart) = state.carts.get_mut(&cart_id) {
                    cart.lines.retain(|l| l.id != line_id);
                    cart.touch();
                }
                Ok(LineMutation::Applied)
            }
        }
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<()> {
        let mut state = self.state.write().await;
        let cart = state
            .carts
            .get_mut(&cart_id)
            .ok_or(StoreError::CartNotFound(cart_id))?;
        cart.lines.clear();
        cart.touch();
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn place_order(&self, request: PlaceOrder) -> Result<Order> {
        let mut state = self.state.write().await;

        if state.fail_on_place_order {
            return Err(StoreError::Unavailable(
                "order storage is offline".to_string(),
            ));
        }

        // Validate everything before the first mutation.
        let cart = state
            .carts
            .get(&request.cart_id)
            .ok_or(StoreError::CartNotFound(request.cart_id))?;
        if cart.version != request.cart_version {
            return Err(StoreError::CartModified {
                cart_id: request.cart_id,
                expected: request.cart_version,
                actual: cart.version,
            });
        }

        if state
            .orders
            .iter()
            .any(|o| o.order_number == request.order.order_number)
        {
            return Err(StoreError::DuplicateOrderNumber(
                request.order.order_number.clone(),
            ));
        }

        let demand = request.stock_demand();
        for (product_id, quantity, price) in &demand {
            let ok = state
                .products
                .get(product_id)
                .is_some_and(|p| p.can_fulfill(*quantity) && p.price == *price);
            if !ok {
                return Err(StoreError::StockConflict {
                    product_id: *product_id,
                });
            }
        }

        for (product_id, quantity, _) in &demand {
            if let Some(product) = state.products.get_mut(product_id) {
                product.stock -= quantity;
            }
        }
        if let Some(cart) = state.carts.get_mut(&request.cart_id) {
            cart.lines.clear();
            cart.touch();
        }
        state.orders.push(request.order.clone());

        Ok(request.order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn list_orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .iter()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.orders.iter_mut().find(|o| o.id == id) {
            Some(order) if order.status == from => {
                order.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
