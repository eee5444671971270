use common::{CartId, CartLineId, CustomerId, SessionToken};
use store::{
    Cart, CartLine, CartOwner, LineMutation, MAX_LINE_QUANTITY, NewCartLine, StoreError,
    Storefront,
};
use tracing::{debug, info};

use super::{CartError, MergePolicy};
use crate::identity::Identity;

/// Service for reading and changing carts.
///
/// Every mutating operation takes the id of the caller's resolved cart, so a
/// line id from someone else's cart is rejected rather than trusted.
#[derive(Clone)]
pub struct CartService<S> {
    store: S,
    merge_policy: MergePolicy,
}

impl<S: Storefront> CartService<S> {
    /// Creates a cart service that absorbs anonymous lines on sign-in.
    pub fn new(store: S) -> Self {
        Self::with_merge_policy(store, MergePolicy::default())
    }

    pub fn with_merge_policy(store: S, merge_policy: MergePolicy) -> Self {
        Self {
            store,
            merge_policy,
        }
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    /// Returns the caller's cart, creating or merging as needed.
    ///
    /// For an authenticated caller with a session token:
    /// - an existing customer cart wins; under [`MergePolicy::AbsorbLines`]
    ///   the anonymous lines are summed into it
    /// - otherwise a non-empty anonymous cart is re-keyed to the customer
    /// - otherwise an empty anonymous cart is discarded and a fresh customer
    ///   cart is created
    #[tracing::instrument(skip(self))]
    pub async fn get_or_create_cart(&self, identity: &Identity) -> Result<Cart, CartError> {
        match identity {
            Identity::Anonymous { session } => Ok(self
                .store
                .get_or_create_cart(&CartOwner::Session(session.clone()))
                .await?),
            Identity::Authenticated {
                customer_id,
                session,
            } => self.customer_cart(*customer_id, session.as_ref()).await,
        }
    }

    async fn customer_cart(
        &self,
        customer_id: CustomerId,
        session: Option<&SessionToken>,
    ) -> Result<Cart, CartError> {
        let owner = CartOwner::Customer(customer_id);

        if let Some(cart) = self.store.find_cart(&owner).await? {
            if let (MergePolicy::AbsorbLines, Some(session)) = (self.merge_policy, session) {
                let moved = self.store.absorb_session_cart(session, cart.id).await?;
                if moved > 0 {
                    metrics::counter!("cart_merges_total", "kind" => "absorb").increment(1);
                    info!(cart_id = %cart.id, lines = moved, "absorbed anonymous cart");
                    return self
                        .store
                        .get_cart(cart.id)
                        .await?
                        .ok_or(CartError::Store(StoreError::CartNotFound(cart.id)));
                }
            }
            return Ok(cart);
        }

        if let Some(session) = session {
            if let Some(cart) = self.store.claim_session_cart(session, customer_id).await? {
                metrics::counter!("cart_merges_total", "kind" => "claim").increment(1);
                info!(cart_id = %cart.id, "claimed anonymous cart");
                return Ok(cart);
            }
            if self.store.discard_empty_session_cart(session).await? {
                debug!("discarded empty anonymous cart");
            }
        }

        Ok(self.store.get_or_create_cart(&owner).await?)
    }

    /// Loads a cart with its lines.
    pub async fn get_cart(&self, cart_id: CartId) -> Result<Cart, CartError> {
        self.store
            .get_cart(cart_id)
            .await?
            .ok_or(CartError::Store(StoreError::CartNotFound(cart_id)))
    }

    /// Adds a product to the cart, summing with an existing line of the same
    /// product, size and color. Stock is not checked until checkout.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, cart_id: CartId, line: NewCartLine) -> Result<CartLine, CartError> {
        if line.quantity == 0 || line.quantity > MAX_LINE_QUANTITY {
            return Err(CartError::InvalidQuantity(i64::from(line.quantity)));
        }

        let product = self.store.get_product(line.product_id).await?;
        if !product.is_some_and(|p| p.is_available) {
            return Err(CartError::ProductUnavailable(line.product_id));
        }

        let quantity = line.quantity;
        let line = self.store.add_line(cart_id, line).await?;
        metrics::counter!("cart_items_added_total").increment(u64::from(quantity));
        Ok(line)
    }

    /// Sets a line's quantity. Zero or less removes the line; more than
    /// [`MAX_LINE_QUANTITY`] is rejected.
    #[tracing::instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        cart_id: CartId,
        line_id: CartLineId,
        quantity: i64,
    ) -> Result<(), CartError> {
        if quantity <= 0 {
            return self.remove_item(cart_id, line_id).await;
        }
        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|q| *q <= MAX_LINE_QUANTITY)
            .ok_or(CartError::InvalidQuantity(quantity))?;

        let mutation = self
            .store
            .set_line_quantity(cart_id, line_id, quantity)
            .await?;
        Self::check_ownership(cart_id, line_id, mutation)
    }

    /// Removes a line. Removing a line that no longer exists is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, cart_id: CartId, line_id: CartLineId) -> Result<(), CartError> {
        let mutation = self.store.remove_line(cart_id, line_id).await?;
        Self::check_ownership(cart_id, line_id, mutation)
    }

    /// Deletes every line; the cart itself stays.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, cart_id: CartId) -> Result<(), CartError> {
        Ok(self.store.clear_cart(cart_id).await?)
    }

    /// Sum of line quantities as committed in the store.
    pub async fn item_count(&self, cart_id: CartId) -> Result<u64, CartError> {
        Ok(self
            .store
            .get_cart(cart_id)
            .await?
            .map_or(0, |cart| cart.item_count()))
    }

    fn check_ownership(
        cart_id: CartId,
        line_id: CartLineId,
        mutation: LineMutation,
    ) -> Result<(), CartError> {
        match mutation {
            LineMutation::Applied => Ok(()),
            LineMutation::Missing => {
                debug!(%line_id, "cart line not found, nothing to change");
                Ok(())
            }
            LineMutation::OwnedElsewhere => Err(CartError::NotOwnedByCaller { cart_id, line_id }),
        }
    }
}
