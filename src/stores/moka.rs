use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

use crate::entry::CacheEntry;
use crate::store::Store;
use crate::utils::now_ms;

/// Configuration for MokaStore.
#[derive(Debug, Clone)]
pub struct MokaStoreConfig {
    /// Maximum number of entries the cache can hold.
    pub max_capacity: u64,

    /// Time to live: entries are evicted after this duration from insertion.
    /// `None` means entries are only removed via entry-level expiry or the
    /// size limit.
    pub time_to_live: Option<Duration>,

    /// Time to idle: entries are evicted if not accessed within this duration.
    pub time_to_idle: Option<Duration>,
}

impl Default for MokaStoreConfig {
    fn default() -> Self {
        MokaStoreConfig {
            max_capacity: 10_000,
            time_to_live: None,
            time_to_idle: None,
        }
    }
}

/// High-performance concurrent cache store using Moka.
///
/// MokaStore provides lock-free concurrent access and automatic background
/// eviction, making it the right backing store under high concurrency
/// (>8 threads) or for large key counts (>10,000 items).
///
/// Entry-level TTL expiry is still checked on `get`; Moka's own policies act
/// as an additional capacity bound on top.
pub struct MokaStore {
    cache: Cache<String, CacheEntry>,
}

impl MokaStore {
    /// Create a new MokaStore with the given configuration.
    pub fn new(config: MokaStoreConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);

        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }

        if let Some(tti) = config.time_to_idle {
            builder = builder.time_to_idle(tti);
        }

        MokaStore {
            cache: builder.build(),
        }
    }

    /// Get cache statistics (for monitoring/debugging).
    pub fn stats(&self) -> (u64, u64) {
        let entry_count = self.cache.entry_count();
        let weighted_size = self.cache.weighted_size();
        (entry_count, weighted_size)
    }
}

#[async_trait]
impl Store for MokaStore {
    fn name(&self) -> &'static str {
        "moka"
    }

    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.cache.get(key).await?;

        if entry.is_expired(now_ms()) {
            // Entry is expired, remove it
            self.cache.invalidate(key).await;
            return None;
        }

        Some(entry)
    }

    async fn set(&self, key: &str, entry: CacheEntry) {
        // Moka handles capacity eviction automatically
        self.cache.insert(key.to_string(), entry).await;
    }

    async fn touch(&self, key: &str, expires_at: i64) {
        if let Some(mut entry) = self.cache.get(key).await {
            entry.expires_at = expires_at;
            self.cache.insert(key.to_string(), entry).await;
        }
    }

    async fn remove(&self, keys: &[&str]) {
        for key in keys {
            self.cache.invalidate(*key).await;
        }
    }
}
