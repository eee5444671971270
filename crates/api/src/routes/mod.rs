//! HTTP route handlers.

pub mod cart;
pub mod catalog;
pub mod health;
pub mod metrics;
pub mod orders;

use uuid::Uuid;

use crate::error::ApiError;

/// Parses a path or query id, naming the field in the error.
pub(crate) fn parse_id<T: From<Uuid>>(raw: &str, field: &str) -> Result<T, ApiError> {
    Uuid::parse_str(raw.trim())
        .map(T::from)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}
