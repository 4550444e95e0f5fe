//! Value objects of the exchange layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The caller's bearer token, verbatim.
///
/// Lives only for the duration of one request; `Debug` never prints the
/// value so request tracing cannot leak credentials.
#[derive(Clone)]
pub struct UserAssertion(String);

impl UserAssertion {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserAssertion(<redacted>)")
    }
}

/// Cache key for one exchange outcome: SHA-256 over client id, assertion and
/// the sorted scope set. Sorting makes the key order-insensitive so
/// `["a", "b"]` and `["b", "a"]` share a cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExchangeKey(String);

impl ExchangeKey {
    pub fn derive(client_id: &str, assertion: &UserAssertion, scopes: &[String]) -> Self {
        let mut sorted: Vec<&str> = scopes.iter().map(String::as_str).collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(client_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(assertion.as_str().as_bytes());
        for scope in sorted {
            hasher.update([0u8]);
            hasher.update(scope.as_bytes());
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Key under which the entry is stored in the shared cache.
    pub fn cache_key(&self) -> String {
        format!("obo:{}", self.0)
    }
}

/// A downstream-scoped token obtained via OBO exchange.
///
/// `expires_at` is already capped by the configured sliding expiration; an
/// entry read back from the cache is unusable once the instant has passed,
/// whatever TTL the cache backend applied.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl ExchangedToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
