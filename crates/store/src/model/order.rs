use chrono::{DateTime, Utc};
use common::{CartId, CustomerId, Money, OrderId, OrderLineId, ProductId};
use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──► Shipped ──► Delivered
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed, awaiting processing.
    #[default]
    Pending,

    Processing,

    Shipped,

    /// Terminal.
    Delivered,

    /// Terminal.
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order may move from this status to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// A placed order. Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub total: Money,
    pub delivery_address: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Sum of all line subtotals.
    pub fn lines_total(&self) -> Money {
        self.lines.iter().map(OrderLine::subtotal).sum()
    }

    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

/// Snapshot of a cart line at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price copied from the catalog when the order was placed.
    pub price_at_order: Money,
    pub selected_size: Option<String>,
    pub selected_color: Option<String>,
}

impl OrderLine {
    pub fn subtotal(&self) -> Money {
        self.price_at_order.multiply(self.quantity)
    }
}

/// Everything the store needs to commit a checkout atomically.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// The order to insert, in `Pending` status.
    pub order: Order,
    /// The cart whose lines become the order.
    pub cart_id: CartId,
    /// Cart version observed when the order was built.
    pub cart_version: i64,
}

impl PlaceOrder {
    /// Quantity and unit price per product, summed across lines and sorted by
    /// product id so stock rows are always locked in the same order.
    pub fn stock_demand(&self) -> Vec<(ProductId, u32, Money)> {
        let mut demand: Vec<(ProductId, u32, Money)> = Vec::new();
        for line in &self.order.lines {
            match demand.iter_mut().find(|(id, _, _)| *id == line.product_id) {
                Some(entry) => entry.1 = entry.1.saturating_add(line.quantity),
                None => demand.push((line.product_id, line.quantity, line.price_at_order)),
            }
        }
        demand.sort_by_key(|(id, _, _)| *id);
        demand
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_line(product_id: ProductId, quantity: u32, cents: i64) -> OrderLine {
        OrderLine {
            id: OrderLineId::new(),
            product_id,
            quantity,
            price_at_order: Money::from_cents(cents),
            selected_size: None,
            selected_color: None,
        }
    }

    #[test]
    fn default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn forward_transitions_only() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(!Shipped.can_transition_to(Processing));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Delivered));
    }

    #[test]
    fn cancel_only_before_shipping() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_states() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Shipped.is_terminal());
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn stock_demand_saturates_instead_of_wrapping() {
        let a = ProductId::new();
        let order = Order {
            id: OrderId::new(),
            order_number: "ORD-1".to_string(),
            customer_id: CustomerId::new(),
            status: OrderStatus::Pending,
            total: Money::zero(),
            delivery_address: "Somewhere 1".to_string(),
            note: None,
            created_at: Utc::now(),
            lines: vec![order_line(a, u32::MAX, 100), order_line(a, 2, 100)],
        };
        let request = PlaceOrder {
            order,
            cart_id: CartId::new(),
            cart_version: 1,
        };

        assert_eq!(request.stock_demand()[0].1, u32::MAX);
    }

    #[test]
    fn stock_demand_groups_lines_of_same_product() {
        let a = ProductId::new();
        let b = ProductId::new();
        let order = Order {
            id: OrderId::new(),
            order_number: "ORD-1".to_string(),
            customer_id: CustomerId::new(),
            status: OrderStatus::Pending,
            total: Money::zero(),
            delivery_address: "Somewhere 1".to_string(),
            note: None,
            created_at: Utc::now(),
            lines: vec![order_line(a, 2, 100), order_line(b, 1, 50), order_line(a, 3, 100)],
        };
        let request = PlaceOrder {
            order,
            cart_id: CartId::new(),
            cart_version: 1,
        };

        let demand = request.stock_demand();
        assert_eq!(demand.len(), 2);
        let a_entry = demand.iter().find(|(id, _, _)| *id == a).unwrap();
        assert_eq!(a_entry.1, 5);
        assert!(demand.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(request.order.lines_total().cents(), 550);
    }
}
