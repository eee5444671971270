//! HTTP API server for the storefront.
//!
//! Provides JSON endpoints for catalog browsing, carts, checkout and order
//! history, with structured logging (tracing) and Prometheus metrics.

pub mod caller;
pub mod config;
pub mod error;
pub mod routes;
pub mod seed;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, put};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Storefront;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Storefront>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/products", get(routes::catalog::list::<S>))
        .route("/products/{id}", get(routes::catalog::get::<S>))
        .route("/categories", get(routes::catalog::categories::<S>))
        .route("/brands", get(routes::catalog::brands::<S>))
        .route(
            "/cart",
            get(routes::cart::get::<S>).delete(routes::cart::clear::<S>),
        )
        .route("/cart/count", get(routes::cart::count::<S>))
        .route(
            "/cart/items",
            axum::routing::post(routes::cart::add_item::<S>),
        )
        .route(
            "/cart/items/{line_id}",
            patch(routes::cart::update_item::<S>).delete(routes::cart::remove_item::<S>),
        )
        .route(
            "/orders",
            get(routes::orders::list::<S>).post(routes::orders::checkout::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/admin/orders/{id}/status",
            put(routes::orders::update_status::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([axum::http::HeaderName::from_static(
                    caller::SESSION_HEADER,
                )]),
        )
        .layer(TraceLayer::new_for_http())
}
