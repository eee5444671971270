//! Liveness endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use store::{CatalogReader, Storefront};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the catalog cannot be read.
    pub status: &'static str,
    pub version: &'static str,
    pub catalog: &'static str,
}

/// GET /health: reports whether the backing store answers catalog reads.
pub async fn check<S: Storefront>(
    State(state): State<Arc<AppState<S>>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (status, catalog) = match state.store.list_categories().await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read the catalog");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    let body = HealthResponse {
        status: if status.is_success() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        catalog,
    };
    (status, Json(body))
}
