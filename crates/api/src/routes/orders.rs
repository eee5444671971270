//! Checkout and order history endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::CheckoutRequest;
use serde::{Deserialize, Serialize};
use store::{Order, OrderLine, OrderStatus, Storefront};

use super::parse_id;
use crate::caller::Caller;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub total: String,
    pub delivery_address: String,
    pub note: Option<String>,
    pub created_at: String,
    pub item_count: u64,
    pub lines: Vec<OrderLineResponse>,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub quantity: u32,
    pub price_at_order_cents: i64,
    pub subtotal_cents: i64,
    pub selected_size: Option<String>,
    pub selected_color: Option<String>,
}

impl From<OrderLine> for OrderLineResponse {
    fn from(line: OrderLine) -> Self {
        Self {
            product_id: line.product_id.to_string(),
            quantity: line.quantity,
            price_at_order_cents: line.price_at_order.cents(),
            subtotal_cents: line.subtotal().cents(),
            selected_size: line.selected_size,
            selected_color: line.selected_color,
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            order_number: order.order_number.clone(),
            status: order.status,
            total_cents: order.total.cents(),
            total: order.total.to_string(),
            item_count: order.item_count(),
            delivery_address: order.delivery_address,
            note: order.note,
            created_at: order.created_at.to_rfc3339(),
            lines: order.lines.into_iter().map(Into::into).collect(),
        }
    }
}

// -- Handlers --

/// POST /orders: checks out the caller's cart.
#[tracing::instrument(skip(state, req))]
pub async fn checkout<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let customer_id = caller.require_customer()?;

    // Resolving the cart first folds in any anonymous cart the caller brought.
    state.carts.get_or_create_cart(&caller.identity()).await?;
    let order = state.checkout.checkout(customer_id, &req).await?;

    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let customer_id = caller.require_customer()?;
    let orders = state.orders.list_orders(customer_id).await?;
    Ok(Json(orders.into_iter().map(Into::into).collect()))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let customer_id = caller.require_customer()?;
    let order_id: OrderId = parse_id(&id, "order id")?;
    let order = state.orders.get_order(customer_id, order_id).await?;
    Ok(Json(order.into()))
}

/// PUT /admin/orders/{id}/status: moves an order along its lifecycle.
#[tracing::instrument(skip(state))]
pub async fn update_status<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let principal = caller.require_principal()?;
    if !state.is_admin(principal) {
        return Err(ApiError::Forbidden(format!(
            "{principal} may not change order status"
        )));
    }

    let order_id: OrderId = parse_id(&id, "order id")?;
    let status: OrderStatus = req.status.parse().map_err(ApiError::BadRequest)?;
    let order = state.orders.advance_status(order_id, status).await?;
    Ok(Json(order.into()))
}
