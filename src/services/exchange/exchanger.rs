//! Cached, single-flight OBO exchange.
//!
//! Responsibility:
//! - Cache lookup before any provider contact; a non-expired hit never
//!   leaves the process.
//! - Per-key single-flight: N concurrent requests sharing an `ExchangeKey`
//!   produce exactly one outbound provider call, the rest read the cache
//!   entry the winner wrote.
//! - Expiry = now + min(provider-stated lifetime, configured sliding cap).
//!
//! Cache failures degrade, they never reject: a failed read counts as a miss,
//! a failed write still returns the freshly exchanged token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::services::cache::SharedCache;
use crate::services::exchange::identity::IdentityClient;
use crate::services::exchange::{ExchangeError, ExchangeKey, ExchangedToken, UserAssertion};

pub struct TokenExchanger {
    cache: SharedCache,
    identity: IdentityClient,
    sliding_cap: Duration,
    deadline: Duration,
    inflight: Mutex<HashMap<ExchangeKey, Arc<Mutex<()>>>>,
}

impl TokenExchanger {
    pub fn new(
        cache: SharedCache,
        identity: IdentityClient,
        sliding_cap: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            cache,
            identity,
            sliding_cap,
            deadline,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn exchange(
        &self,
        assertion: &UserAssertion,
        scopes: &[String],
    ) -> Result<ExchangedToken, ExchangeError> {
        let key = ExchangeKey::derive(self.identity.client_id(), assertion, scopes);

        if let Some(token) = self.read_cached(&key).await {
            tracing::debug!("token cache hit");
            return Ok(token);
        }

        let guard = self.inflight_guard(&key).await;
        let _held = guard.lock().await;

        // Whoever held the guard before us may have populated the cache.
        let result = match self.read_cached(&key).await {
            Some(token) => {
                tracing::debug!("token cache hit after single-flight wait");
                Ok(token)
            }
            None => self.exchange_and_store(assertion, scopes, &key).await,
        };

        drop(_held);
        self.release_guard(&key, guard).await;

        result
    }

    async fn exchange_and_store(
        &self,
        assertion: &UserAssertion,
        scopes: &[String],
        key: &ExchangeKey,
    ) -> Result<ExchangedToken, ExchangeError> {
        let provider_token = tokio::time::timeout(
            self.deadline,
            self.identity.exchange_on_behalf_of(assertion, scopes),
        )
        .await
        .map_err(|_| ExchangeError::Timeout(self.deadline))??;

        let lifetime = Duration::from_secs(provider_token.expires_in_seconds).min(self.sliding_cap);
        let token = ExchangedToken {
            access_token: provider_token.access_token,
            expires_at: Utc::now()
                + TimeDelta::from_std(lifetime).unwrap_or(TimeDelta::seconds(60)),
        };

        match serde_json::to_string(&token) {
            Ok(serialized) => {
                match tokio::time::timeout(
                    self.deadline,
                    self.cache.set_with_ttl(&key.cache_key(), &serialized, lifetime),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => tracing::warn!(error = %err, "token cache write failed"),
                    Err(_) => tracing::warn!("token cache write timed out"),
                }
            }
            Err(err) => tracing::warn!(error = %err, "token serialization failed"),
        }

        Ok(token)
    }

    /// Cache read, fail-open: backend errors, timeouts and unreadable entries
    /// count as a miss, expired entries are dropped. The cache is a
    /// suspension point like the provider call, so it gets the same deadline:
    /// a hung backend must not stall the request.
    async fn read_cached(&self, key: &ExchangeKey) -> Option<ExchangedToken> {
        let raw = match tokio::time::timeout(
            self.deadline,
            self.cache.get_string(&key.cache_key()),
        )
        .await
        {
            Ok(Ok(raw)) => raw?,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "token cache read failed, treating as miss");
                return None;
            }
            Err(_) => {
                tracing::warn!("token cache read timed out, treating as miss");
                return None;
            }
        };

        let token: ExchangedToken = match serde_json::from_str(&raw) {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "unreadable token cache entry, dropping");
                self.drop_entry(key).await;
                return None;
            }
        };

        if token.is_expired(Utc::now()) {
            self.drop_entry(key).await;
            return None;
        }

        Some(token)
    }

    /// Best-effort delete, bounded like every other cache op.
    async fn drop_entry(&self, key: &ExchangeKey) {
        let _ = tokio::time::timeout(self.deadline, self.cache.del(&key.cache_key())).await;
    }

    async fn inflight_guard(&self, key: &ExchangeKey) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;
        inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no other waiter holds the guard, so the
    /// in-flight map does not grow with the number of distinct keys ever seen.
    async fn release_guard(&self, key: &ExchangeKey, guard: Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().await;
        drop(guard);
        if let Some(entry) = inflight.get(key) {
            if Arc::strong_count(entry) == 1 {
                inflight.remove(key);
            }
        }
    }
}
