use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use common::{CustomerId, Money, OrderId, OrderLineId, ProductId};
use store::{Cart, CartOwner, Order, OrderLine, OrderStatus, PlaceOrder, Product, StoreError, Storefront};
use tracing::{info, warn};

use super::{CheckoutConfig, CheckoutError, CheckoutRequest, DatedOrderNumbers, OrderNumberGenerator};

/// Converts a customer's cart into an order.
///
/// Preconditions (non-empty cart, known customer, enough stock) are checked
/// before anything is written. The order insert, stock decrement and cart
/// clear then commit as one unit through [`store::OrderRepository::place_order`].
#[derive(Clone)]
pub struct CheckoutService<S, G = DatedOrderNumbers> {
    store: S,
    numbers: G,
    config: CheckoutConfig,
}

impl<S: Storefront> CheckoutService<S> {
    pub fn new(store: S) -> Self {
        Self::with_generator(store, DatedOrderNumbers)
    }
}

impl<S: Storefront, G: OrderNumberGenerator> CheckoutService<S, G> {
    pub fn with_generator(store: S, numbers: G) -> Self {
        Self {
            store,
            numbers,
            config: CheckoutConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CheckoutConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> CheckoutConfig {
        self.config
    }

    /// Places an order for everything in the customer's cart.
    #[tracing::instrument(skip_all, fields(customer_id = %customer_id))]
    pub async fn checkout(
        &self,
        customer_id: CustomerId,
        request: &CheckoutRequest,
    ) -> Result<Order, CheckoutError> {
        let start = Instant::now();
        let result = self.run(customer_id, request).await;

        let outcome = match &result {
            Ok(_) => "placed",
            Err(e) => e.outcome(),
        };
        metrics::counter!("checkouts_total", "outcome" => outcome).increment(1);
        metrics::histogram!("checkout_duration_seconds").record(start.elapsed().as_secs_f64());

        result
    }

    async fn run(
        &self,
        customer_id: CustomerId,
        request: &CheckoutRequest,
    ) -> Result<Order, CheckoutError> {
        let request = request.validated()?;
        let mut conflicts = 0;

        loop {
            match self.attempt(customer_id, &request).await {
                Err(e) if e.is_conflict() && conflicts < self.config.conflict_retries => {
                    conflicts += 1;
                    warn!(error = %e, attempt = conflicts, "checkout conflict, retrying");
                }
                result => return result,
            }
        }
    }

    async fn attempt(
        &self,
        customer_id: CustomerId,
        request: &CheckoutRequest,
    ) -> Result<Order, CheckoutError> {
        // 1. Resolve the cart
        let cart = match self.store.find_cart(&CartOwner::Customer(customer_id)).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => return Err(CheckoutError::EmptyCart),
        };

        // 2. Resolve the customer
        if self.store.get_customer(customer_id).await?.is_none() {
            return Err(CheckoutError::CustomerNotFound(customer_id));
        }

        // 3. Re-check current availability and stock for every line
        let products = self.validate_stock(&cart).await?;

        // 5-6. Snapshot prices into order lines
        let lines: Vec<OrderLine> = cart
            .lines
            .iter()
            .map(|line| {
                let price = products
                    .get(&line.product_id)
                    .map_or_else(Money::zero, |p| p.price);
                OrderLine {
                    id: OrderLineId::new(),
                    product_id: line.product_id,
                    quantity: line.quantity,
                    price_at_order: price,
                    selected_size: line.selected_size.clone(),
                    selected_color: line.selected_color.clone(),
                }
            })
            .collect();
        let total: Money = lines.iter().map(OrderLine::subtotal).sum();

        // 4, 7-8. Commit with a fresh order number until one sticks
        let attempts = self.config.order_number_attempts.max(1);
        let mut last_number = String::new();
        for attempt in 1..=attempts {
            let now = Utc::now();
            let order = Order {
                id: OrderId::new(),
                order_number: self.numbers.next_number(now),
                customer_id,
                status: OrderStatus::Pending,
                total,
                delivery_address: request.delivery_address.clone(),
                note: request.note.clone(),
                created_at: now,
                lines: lines.clone(),
            };

            match self
                .store
                .place_order(PlaceOrder {
                    order,
                    cart_id: cart.id,
                    cart_version: cart.version,
                })
                .await
            {
                Ok(order) => {
                    info!(
                        order_number = %order.order_number,
                        total = %order.total,
                        lines = order.lines.len(),
                        "order placed"
                    );
                    return Ok(order);
                }
                Err(StoreError::DuplicateOrderNumber(number)) => {
                    metrics::counter!("order_number_collisions_total").increment(1);
                    warn!(%number, attempt, "order number collision");
                    last_number = number;
                }
                Err(StoreError::StockConflict { product_id }) => {
                    return Err(CheckoutError::ConcurrentStockConflict { product_id });
                }
                Err(StoreError::CartModified { cart_id, .. }) => {
                    return Err(CheckoutError::CartModified(cart_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CheckoutError::DuplicateOrderNumber(last_number))
    }

    /// Loads every product in the cart and checks the summed quantity per
    /// product against current stock. Unavailable products have no stock.
    async fn validate_stock(
        &self,
        cart: &Cart,
    ) -> Result<HashMap<ProductId, Product>, CheckoutError> {
        let mut requested: Vec<(ProductId, u32)> = Vec::new();
        for line in &cart.lines {
            match requested.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some(entry) => entry.1 = entry.1.saturating_add(line.quantity),
                None => requested.push((line.product_id, line.quantity)),
            }
        }

        let mut products = HashMap::with_capacity(requested.len());
        for (product_id, quantity) in requested {
            let product = self.store.get_product(product_id).await?;
            let available = match &product {
                Some(p) if p.is_available => p.stock,
                _ => 0,
            };
            if available < quantity {
                return Err(CheckoutError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available,
                });
            }
            if let Some(product) = product {
                products.insert(product_id, product);
            }
        }
        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};
    use common::{CartId, CartLineId};
    use store::{
        CartLine, CartRepository, CatalogReader, Customer, InMemoryStore, NewCartLine, NewProduct,
    };

    use super::*;

    /// Hands out a fixed list of numbers, then falls back to dated ones.
    struct ScriptedNumbers {
        numbers: Mutex<VecDeque<String>>,
    }

    impl ScriptedNumbers {
        fn new(numbers: &[&str]) -> Self {
            Self {
                numbers: Mutex::new(numbers.iter().map(|n| n.to_string()).collect()),
            }
        }
    }

    impl OrderNumberGenerator for ScriptedNumbers {
        fn next_number(&self, now: DateTime<Utc>) -> String {
            self.numbers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| DatedOrderNumbers.next_number(now))
        }
    }

    struct Fixture {
        store: InMemoryStore,
        customer_id: CustomerId,
        cart_id: CartId,
        product: Product,
    }

    async fn fixture(stock: u32, quantity: u32) -> Fixture {
        let store = InMemoryStore::new();
        let category = store.insert_category("Shirts").await;
        let product = store
            .insert_product(NewProduct::new(
                "Tee",
                Money::from_cents(1250),
                stock,
                category.id,
            ))
            .await;
        let customer = Customer::new("Ada", "ada@example.com", "555-0100");
        let customer_id = customer.id;
        store.insert_customer("ada", customer).await;

        let cart = store
            .get_or_create_cart(&CartOwner::Customer(customer_id))
            .await
            .unwrap();
        store
            .add_line(cart.id, NewCartLine::new(product.id, quantity))
            .await
            .unwrap();

        Fixture {
            store,
            customer_id,
            cart_id: cart.id,
            product,
        }
    }

    fn request() -> CheckoutRequest {
        CheckoutRequest::new("1 Main St").note("Leave at the door")
    }

    #[tokio::test]
    async fn checkout_places_order_and_clears_cart() {
        let f = fixture(10, 3).await;
        let service = CheckoutService::new(f.store.clone());

        let order = service.checkout(f.customer_id, &request()).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total, Money::from_cents(3750));
        assert_eq!(order.note.as_deref(), Some("Leave at the door"));
        assert!(order.order_number.starts_with("ORD-"));
        let product = f.store.get_product(f.product.id).await.unwrap().unwrap();
        assert_eq!(product.stock, 7);
        let cart = f.store.get_cart(f.cart_id).await.unwrap().unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let f = fixture(10, 1).await;
        f.store.clear_cart(f.cart_id).await.unwrap();
        let service = CheckoutService::new(f.store.clone());

        let result = service.checkout(f.customer_id, &request()).await;
        assert!(matches!(result, Err(CheckoutError::EmptyCart)));
    }

    #[tokio::test]
    async fn customer_without_cart_has_empty_cart() {
        let f = fixture(10, 1).await;
        let service = CheckoutService::new(f.store.clone());

        let result = service.checkout(CustomerId::new(), &request()).await;
        assert!(matches!(result, Err(CheckoutError::EmptyCart)));
    }

    #[tokio::test]
    async fn cart_without_customer_record_is_rejected() {
        let f = fixture(10, 1).await;
        let orphan = CustomerId::new();
        let cart = f
            .store
            .get_or_create_cart(&CartOwner::Customer(orphan))
            .await
            .unwrap();
        f.store
            .add_line(cart.id, NewCartLine::new(f.product.id, 1))
            .await
            .unwrap();
        let service = CheckoutService::new(f.store.clone());

        let result = service.checkout(orphan, &request()).await;
        assert!(matches!(result, Err(CheckoutError::CustomerNotFound(id)) if id == orphan));
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_before_reading_the_cart() {
        let f = fixture(10, 1).await;
        let service = CheckoutService::new(f.store.clone());

        let result = service
            .checkout(f.customer_id, &CheckoutRequest::new(" "))
            .await;
        assert!(matches!(result, Err(CheckoutError::InvalidRequest(_))));
        assert_eq!(f.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn quantities_are_summed_per_product() {
        let f = fixture(4, 3).await;
        f.store
            .add_line(f.cart_id, NewCartLine::new(f.product.id, 2).size("L"))
            .await
            .unwrap();
        let service = CheckoutService::new(f.store.clone());

        let result = service.checkout(f.customer_id, &request()).await;
        assert!(matches!(
            result,
            Err(CheckoutError::InsufficientStock {
                requested: 5,
                available: 4,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn oversized_demand_does_not_wrap() {
        let f = fixture(10, 1).await;
        let mut cart = f.store.get_cart(f.cart_id).await.unwrap().unwrap();
        for (quantity, size) in [(u32::MAX, "M"), (2, "L")] {
            cart.lines.push(CartLine {
                id: CartLineId::new(),
                cart_id: cart.id,
                product_id: f.product.id,
                quantity,
                selected_size: Some(size.to_string()),
                selected_color: None,
            });
        }
        let service = CheckoutService::new(f.store.clone());

        let result = service.validate_stock(&cart).await;
        assert!(matches!(
            result,
            Err(CheckoutError::InsufficientStock {
                requested: u32::MAX,
                available: 10,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn unavailable_product_counts_as_no_stock() {
        let f = fixture(10, 1).await;
        f.store.set_product_available(f.product.id, false).await;
        let service = CheckoutService::new(f.store.clone());

        let result = service.checkout(f.customer_id, &request()).await;
        assert!(matches!(
            result,
            Err(CheckoutError::InsufficientStock { available: 0, .. })
        ));
    }

    #[tokio::test]
    async fn collision_retries_with_a_new_number() {
        let f = fixture(10, 1).await;
        let existing = fixture(10, 1).await;
        // Seed an order that owns the first scripted number.
        let taken = CheckoutService::with_generator(
            existing.store.clone(),
            ScriptedNumbers::new(&["ORD-TAKEN"]),
        )
        .checkout(existing.customer_id, &request())
        .await
        .unwrap();
        f.store.insert_order(taken).await;

        let service = CheckoutService::with_generator(
            f.store.clone(),
            ScriptedNumbers::new(&["ORD-TAKEN", "ORD-FRESH"]),
        );
        let order = service.checkout(f.customer_id, &request()).await.unwrap();

        assert_eq!(order.order_number, "ORD-FRESH");
        assert_eq!(f.store.order_count().await, 2);
    }

    #[tokio::test]
    async fn collisions_surface_after_the_retry_bound() {
        let f = fixture(10, 1).await;
        let existing = fixture(10, 1).await;
        let taken = CheckoutService::with_generator(
            existing.store.clone(),
            ScriptedNumbers::new(&["ORD-TAKEN"]),
        )
        .checkout(existing.customer_id, &request())
        .await
        .unwrap();
        f.store.insert_order(taken).await;

        let service = CheckoutService::with_generator(
            f.store.clone(),
            ScriptedNumbers::new(&["ORD-TAKEN", "ORD-TAKEN"]),
        )
        .with_config(CheckoutConfig {
            order_number_attempts: 2,
            conflict_retries: 1,
        });
        let result = service.checkout(f.customer_id, &request()).await;

        assert!(matches!(result, Err(CheckoutError::DuplicateOrderNumber(ref n)) if n == "ORD-TAKEN"));
        let product = f.store.get_product(f.product.id).await.unwrap().unwrap();
        assert_eq!(product.stock, 10);
        assert_eq!(f.store.get_cart(f.cart_id).await.unwrap().unwrap().item_count(), 1);
    }

    #[tokio::test]
    async fn storage_failure_leaves_cart_and_stock() {
        let f = fixture(10, 2).await;
        f.store.set_fail_on_place_order(true).await;
        let service = CheckoutService::new(f.store.clone());

        let result = service.checkout(f.customer_id, &request()).await;

        assert!(matches!(result, Err(CheckoutError::Store(_))));
        let product = f.store.get_product(f.product.id).await.unwrap().unwrap();
        assert_eq!(product.stock, 10);
        assert_eq!(f.store.get_cart(f.cart_id).await.unwrap().unwrap().item_count(), 2);
        assert_eq!(f.store.order_count().await, 0);
    }
}
