//! Cache client interface used by the token-exchange layer.
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-layer errors (transport/command/serialization).
///
/// Kept independent from `AppError` so callers can decide how to fail.
/// The token cache fails open: a broken cache degrades to "every lookup is a
/// miss", it never rejects requests.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    BackendConnection(String),
    #[error("cache command error: {0}")]
    BackendCommand(String),
    #[error("cache value error: {0}")]
    InvalidValue(String),
}

/// A minimal cache interface.
///
/// This is intentionally small and string-based:
/// - Token caching only needs `GET` and `SET` with a TTL, plus `DEL` to drop
///   entries that turn out to be expired on read.
/// - Implementations are shared behind `Arc<dyn CacheClient>` so the backend
///   (Valkey vs in-process) is a startup-time decision, not a type parameter
///   that leaks into every caller.
#[async_trait]
pub trait CacheClient: Send + Sync {
    // Returns the cache backend name (for logging/metrics).
    fn backend_name(&self) -> &'static str;

    // Get UTF-8 string value.
    async fn get_string(&self, key: &str) -> CacheResult<Option<String>>;

    // Set value with TTL, overwriting any existing entry.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    // Delete a key. Returns number of deleted keys.
    async fn del(&self, key: &str) -> CacheResult<u64>;
}

pub type SharedCache = Arc<dyn CacheClient>;
