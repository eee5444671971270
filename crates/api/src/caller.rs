//! Caller identity taken from request headers.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue};
use common::{CustomerId, SessionToken};
use domain::Identity;
use store::{IdentityResolver, Storefront};

use crate::error::ApiError;
use crate::state::AppState;

/// Session token of an anonymous shopper. Issued and echoed back when absent.
pub const SESSION_HEADER: &str = "x-cart-session";

/// User name asserted by the upstream identity provider.
pub const PRINCIPAL_HEADER: &str = "x-principal";

const MAX_HEADER_LEN: usize = 128;

/// The caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    session: SessionToken,
    /// True when the request carried its own session token.
    session_supplied: bool,
    principal: Option<String>,
    customer_id: Option<CustomerId>,
}

impl Caller {
    pub fn session(&self) -> &SessionToken {
        &self.session
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Cart identity: the linked customer if there is one, else the session.
    pub fn identity(&self) -> Identity {
        match self.customer_id {
            Some(customer_id) => Identity::authenticated(
                customer_id,
                self.session_supplied.then(|| self.session.clone()),
            ),
            None => Identity::anonymous(self.session.clone()),
        }
    }

    /// The principal, or 401 for anonymous callers.
    pub fn require_principal(&self) -> Result<&str, ApiError> {
        self.principal()
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {PRINCIPAL_HEADER} header")))
    }

    /// The linked customer, or 401 for anonymous callers and 404 for
    /// principals without a customer record.
    pub fn require_customer(&self) -> Result<CustomerId, ApiError> {
        let principal = self.require_principal()?;
        self.customer_id
            .ok_or_else(|| ApiError::NotFound(format!("no customer linked to {principal}")))
    }

    /// Response header carrying the session token back to the client.
    pub fn session_header(&self) -> Result<(HeaderName, HeaderValue), ApiError> {
        let value = HeaderValue::from_str(self.session.as_str())
            .map_err(|e| ApiError::Internal(format!("unencodable session token: {e}")))?;
        Ok((HeaderName::from_static(SESSION_HEADER), value))
    }
}

fn header_text(parts: &Parts, name: &str) -> Result<Option<String>, ApiError> {
    let Some(value) = parts.headers.get(name) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{name} header must be visible ASCII")))?
        .trim();
    if text.is_empty() {
        return Ok(None);
    }
    if text.len() > MAX_HEADER_LEN {
        return Err(ApiError::BadRequest(format!(
            "{name} header must be at most {MAX_HEADER_LEN} characters"
        )));
    }
    Ok(Some(text.to_string()))
}

impl<S: Storefront> FromRequestParts<Arc<AppState<S>>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let supplied = header_text(parts, SESSION_HEADER)?;
        let principal = header_text(parts, PRINCIPAL_HEADER)?;

        let customer_id = match &principal {
            Some(principal) => state.store.resolve_customer(principal).await?,
            None => None,
        };

        Ok(Caller {
            session_supplied: supplied.is_some(),
            session: supplied.map_or_else(SessionToken::generate, SessionToken::new),
            principal,
            customer_id,
        })
    }
}
