//! Order history and status.

use common::{CustomerId, OrderId};
use store::{Order, OrderStatus, StoreError, Storefront};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Read access to a customer's orders plus the status workflow.
#[derive(Clone)]
pub struct OrderService<S> {
    store: S,
}

impl<S: Storefront> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The customer's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, customer_id: CustomerId) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.list_orders_for_customer(customer_id).await?)
    }

    /// Loads one order. Orders of other customers are reported as not found.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
    ) -> Result<Order, OrderError> {
        match self.store.get_order(order_id).await? {
            Some(order) if order.customer_id == customer_id => Ok(order),
            _ => Err(OrderError::NotFound(order_id)),
        }
    }

    /// Moves an order forward in its lifecycle.
    #[tracing::instrument(skip(self))]
    pub async fn advance_status(
        &self,
        order_id: OrderId,
        to: OrderStatus,
    ) -> Result<Order, OrderError> {
        let mut order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;
        let from = order.status;

        if !from.can_transition_to(to) {
            return Err(OrderError::InvalidStatusTransition { from, to });
        }
        // Compare-and-set: someone else may have moved the order meanwhile.
        if !self.store.update_order_status(order_id, from, to).await? {
            return Err(OrderError::InvalidStatusTransition { from, to });
        }

        info!(order_number = %order.order_number, %from, %to, "order status changed");
        order.status = to;
        Ok(order)
    }
}
