//! Who is calling.

use common::{CustomerId, SessionToken};
use store::CartOwner;

/// The caller as seen by the cart and checkout services.
///
/// The HTTP layer builds this from the session header and the resolved
/// principal. An authenticated caller may still carry the session token of
/// the anonymous cart they used before signing in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous {
        session: SessionToken,
    },
    Authenticated {
        customer_id: CustomerId,
        session: Option<SessionToken>,
    },
}

impl Identity {
    pub fn anonymous(session: SessionToken) -> Self {
        Identity::Anonymous { session }
    }

    pub fn authenticated(customer_id: CustomerId, session: Option<SessionToken>) -> Self {
        Identity::Authenticated {
            customer_id,
            session,
        }
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        match self {
            Identity::Anonymous { .. } => None,
            Identity::Authenticated { customer_id, .. } => Some(*customer_id),
        }
    }

    pub fn session(&self) -> Option<&SessionToken> {
        match self {
            Identity::Anonymous { session } => Some(session),
            Identity::Authenticated { session, .. } => session.as_ref(),
        }
    }

    /// The key of the cart this caller ultimately works with.
    pub fn cart_owner(&self) -> CartOwner {
        match self {
            Identity::Anonymous { session } => CartOwner::Session(session.clone()),
            Identity::Authenticated { customer_id, .. } => CartOwner::Customer(*customer_id),
        }
    }
}
