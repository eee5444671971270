//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{CartError, CheckoutError, OrderError};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The route needs an authenticated principal.
    Unauthorized(String),
    /// The principal may not perform the action.
    Forbidden(String),
    Cart(CartError),
    Checkout(CheckoutError),
    Order(OrderError),
    Store(StoreError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Cart(err) => cart_error_to_response(err),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Order(err) => order_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn cart_error_to_response(err: CartError) -> (StatusCode, String) {
    match err {
        CartError::ProductUnavailable(_)
        | CartError::InvalidQuantity(_)
        | CartError::QuantityLimit { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        CartError::NotOwnedByCaller { .. } => (StatusCode::FORBIDDEN, err.to_string()),
        CartError::Store(err) => store_error_to_response(err),
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    match err {
        CheckoutError::EmptyCart | CheckoutError::InvalidRequest(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        CheckoutError::CustomerNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        CheckoutError::InsufficientStock { .. }
        | CheckoutError::ConcurrentStockConflict { .. }
        | CheckoutError::CartModified(_) => (StatusCode::CONFLICT, err.to_string()),
        CheckoutError::DuplicateOrderNumber(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        CheckoutError::Store(err) => store_error_to_response(err),
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, String) {
    match err {
        OrderError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        OrderError::InvalidStatusTransition { .. } => (StatusCode::CONFLICT, err.to_string()),
        OrderError::Store(err) => store_error_to_response(err),
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, String) {
    match err {
        StoreError::CartNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        StoreError::QuantityLimit { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        StoreError::StockConflict { .. } | StoreError::CartModified { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        ref e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => {
            tracing::error!(error = %err, "storage failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal storage error".to_string(),
            )
        }
    }
}

impl From<CartError> for ApiError {
    fn from(err: CartError) -> Self {
        ApiError::Cart(err)
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}
