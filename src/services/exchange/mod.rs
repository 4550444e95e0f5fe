//! On-behalf-of (OBO) token exchange.
//!
//! The gateway never forwards the caller's token downstream. Instead, the
//! inbound user assertion is exchanged at the identity provider for a token
//! scoped to the target API, and that token is what the proxied request
//! carries. Exchange results are cached per (client, assertion, scopes) so
//! burst traffic for one user does not hammer the provider.

pub mod exchanger;
pub mod identity;
pub mod types;

use std::time::Duration;

use thiserror::Error;

pub use exchanger::TokenExchanger;
pub use identity::IdentityClient;
pub use types::{ExchangeKey, ExchangedToken, UserAssertion};

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The provider processed the request and said no (bad assertion,
    /// consent required, disallowed scope). Maps to 401; never retried.
    #[error("exchange rejected: {code}: {description}")]
    Rejected { code: String, description: String },

    /// Transport-level failure: unreachable endpoint, malformed response.
    #[error("identity provider error: {0}")]
    Provider(String),

    /// The per-request deadline elapsed before the provider answered.
    #[error("token exchange timed out after {0:?}")]
    Timeout(Duration),
}
