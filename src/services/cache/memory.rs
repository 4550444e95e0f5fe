//! In-process cache backend.
//!
//! Used when `CACHE_CONNECTION` is not configured (single-instance deploys,
//! local development, tests). Entries expire lazily on read, and every write
//! sweeps dead entries first. Exchange keys embed the user assertion and so
//! rotate with each freshly issued user token; without the sweep, keys that
//! are never read again would pin the map for the process lifetime.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::services::cache::client::{CacheClient, CacheResult};

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some((_, deadline)) if *deadline <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        // Opportunistic sweep: keys are rarely re-read once the assertion
        // they embed rotates, so reads alone cannot reclaim them.
        entries.retain(|_, (_, deadline)| *deadline > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).map(|_| 1).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = MemoryCache::new();

        cache
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get_string("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let cache = MemoryCache::new();

        cache
            .set_with_ttl("k", "v", Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get_string("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_sweep_expired_entries() {
        let cache = MemoryCache::new();

        // Keys that will never be read again (rotated assertions).
        for i in 0..10 {
            cache
                .set_with_ttl(&format!("old-{i}"), "v", Duration::from_millis(10))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(30)).await;

        cache
            .set_with_ttl("fresh", "v", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.entries.lock().await.len(), 1);
        assert_eq!(
            cache.get_string("fresh").await.unwrap(),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn del_removes_entry() {
        let cache = MemoryCache::new();

        cache
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.del("k").await.unwrap(), 1);
        assert_eq!(cache.get_string("k").await.unwrap(), None);
        assert_eq!(cache.del("k").await.unwrap(), 0);
    }
}
