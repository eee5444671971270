//! Cart endpoints.
//!
//! Every response echoes the caller's session token in `x-cart-session` so
//! anonymous clients can keep using the cart they were issued.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{CartLineId, ProductId};
use serde::{Deserialize, Serialize};
use store::{Cart, CartOwner, CatalogReader, NewCartLine, Storefront};

use super::parse_id;
use crate::caller::Caller;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub size: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub id: String,
    pub owner: &'static str,
    pub version: i64,
    pub lines: Vec<CartLineResponse>,
    pub item_count: u64,
    pub total_cents: i64,
}

#[derive(Serialize)]
pub struct CartLineResponse {
    pub id: String,
    pub product_id: String,
    /// None when the product has been removed from the catalog.
    pub product_name: Option<String>,
    pub quantity: u32,
    pub selected_size: Option<String>,
    pub selected_color: Option<String>,
    pub unit_price_cents: Option<i64>,
    pub subtotal_cents: Option<i64>,
    pub is_available: bool,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Joins cart lines with current catalog data for display.
async fn cart_response<S: Storefront>(store: &S, cart: Cart) -> Result<CartResponse, ApiError> {
    let mut lines = Vec::with_capacity(cart.lines.len());
    let mut total_cents = 0;
    for line in &cart.lines {
        let product = store.get_product(line.product_id).await?;
        let subtotal = product.as_ref().map(|p| p.price.multiply(line.quantity));
        total_cents += subtotal.map_or(0, |s| s.cents());

        lines.push(CartLineResponse {
            id: line.id.to_string(),
            product_id: line.product_id.to_string(),
            product_name: product.as_ref().map(|p| p.name.clone()),
            quantity: line.quantity,
            selected_size: line.selected_size.clone(),
            selected_color: line.selected_color.clone(),
            unit_price_cents: product.as_ref().map(|p| p.price.cents()),
            subtotal_cents: subtotal.map(|s| s.cents()),
            is_available: product.is_some_and(|p| p.is_available),
        });
    }

    Ok(CartResponse {
        id: cart.id.to_string(),
        owner: match cart.owner {
            CartOwner::Session(_) => "session",
            CartOwner::Customer(_) => "customer",
        },
        version: cart.version,
        item_count: cart.item_count(),
        total_cents,
        lines,
    })
}

async fn respond<S: Storefront>(
    state: &AppState<S>,
    caller: &Caller,
    status: StatusCode,
    cart: Cart,
) -> Result<Response, ApiError> {
    let body = cart_response(&state.store, cart).await?;
    Ok((status, [caller.session_header()?], Json(body)).into_response())
}

// -- Handlers --

/// GET /cart: the caller's cart, merging an anonymous cart on first
/// authenticated access.
#[tracing::instrument(skip(state))]
pub async fn get<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Response, ApiError> {
    let cart = state.carts.get_or_create_cart(&caller.identity()).await?;
    respond(&state, &caller, StatusCode::OK, cart).await
}

/// GET /cart/count: number of items for the cart badge.
#[tracing::instrument(skip(state))]
pub async fn count<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Response, ApiError> {
    let cart = state.carts.get_or_create_cart(&caller.identity()).await?;
    let count = state.carts.item_count(cart.id).await?;
    Ok(([caller.session_header()?], Json(CountResponse { count })).into_response())
}

/// POST /cart/items
#[tracing::instrument(skip(state))]
pub async fn add_item<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<AddItemRequest>,
) -> Result<Response, ApiError> {
    let product_id: ProductId = parse_id(&req.product_id, "product_id")?;
    let mut line = NewCartLine::new(product_id, req.quantity);
    line.selected_size = req.size.filter(|s| !s.trim().is_empty());
    line.selected_color = req.color.filter(|c| !c.trim().is_empty());

    let cart = state.carts.get_or_create_cart(&caller.identity()).await?;
    state.carts.add_item(cart.id, line).await?;

    let cart = state.carts.get_cart(cart.id).await?;
    respond(&state, &caller, StatusCode::CREATED, cart).await
}

/// PATCH /cart/items/{line_id}: sets a quantity; zero or less removes the line.
#[tracing::instrument(skip(state))]
pub async fn update_item<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(line_id): Path<String>,
    Json(req): Json<UpdateQuantityRequest>,
) -> Result<Response, ApiError> {
    let line_id: CartLineId = parse_id(&line_id, "line id")?;
    let cart = state.carts.get_or_create_cart(&caller.identity()).await?;
    state
        .carts
        .update_quantity(cart.id, line_id, req.quantity)
        .await?;

    let cart = state.carts.get_cart(cart.id).await?;
    respond(&state, &caller, StatusCode::OK, cart).await
}

/// DELETE /cart/items/{line_id}
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(line_id): Path<String>,
) -> Result<Response, ApiError> {
    let line_id: CartLineId = parse_id(&line_id, "line id")?;
    let cart = state.carts.get_or_create_cart(&caller.identity()).await?;
    state.carts.remove_item(cart.id, line_id).await?;

    let cart = state.carts.get_cart(cart.id).await?;
    respond(&state, &caller, StatusCode::OK, cart).await
}

/// DELETE /cart: removes every line, keeping the cart.
#[tracing::instrument(skip(state))]
pub async fn clear<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Response, ApiError> {
    let cart = state.carts.get_or_create_cart(&caller.identity()).await?;
    state.carts.clear(cart.id).await?;

    let cart = state.carts.get_cart(cart.id).await?;
    respond(&state, &caller, StatusCode::OK, cart).await
}
