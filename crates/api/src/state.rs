//! Shared application state.

use domain::{CartService, CheckoutService, OrderService};
use store::Storefront;

use crate::config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub store: S,
    pub carts: CartService<S>,
    pub checkout: CheckoutService<S>,
    pub orders: OrderService<S>,
    /// Principals allowed to move orders through their lifecycle.
    pub admin_principals: Vec<String>,
}

impl<S: Storefront> AppState<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            carts: CartService::with_merge_policy(store.clone(), config.merge_policy),
            checkout: CheckoutService::new(store.clone()).with_config(config.checkout),
            orders: OrderService::new(store.clone()),
            admin_principals: config.admin_principals.clone(),
            store,
        }
    }

    pub fn is_admin(&self, principal: &str) -> bool {
        self.admin_principals.iter().any(|p| p == principal)
    }
}
