use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::entry::CacheEntry;
use crate::store::Store;
use crate::utils::{now_ms, rand_simple};

/// Configuration for purging expired entries on set operations.
#[derive(Debug, Clone)]
pub struct PurgeOnSetConfig {
    /// Provide a number between 0 and 1 to calculate whether a purge should run on each set.
    ///
    /// - `1.0` -> run a purge on every `set`
    /// - `0.5` -> run a purge on every 2nd `set` (on average)
    /// - `0.0` -> disable purging
    pub frequency: f64,

    /// After removing expired entries, remove the soonest-expiring entries
    /// until the number of items in the map is lower than `max_items`.
    pub max_items: usize,
}

/// Configuration for HashMapStore.
#[derive(Debug, Clone, Default)]
pub struct HashMapStoreConfig {
    /// Remove expired entries on a fraction of `set` operations.
    pub purge_on_set: Option<PurgeOnSetConfig>,
}

/// In-memory cache store using HashMap with RwLock.
///
/// This is a simple store suitable for:
/// - Low to moderate concurrency (<8 threads)
/// - Small to medium cache sizes (<1000 items)
/// - Applications prioritizing simplicity over performance
///
/// For high-concurrency scenarios, consider using `MokaStore` instead.
pub struct HashMapStore {
    state: RwLock<HashMap<String, CacheEntry>>,
    purge_on_set: Option<PurgeOnSetConfig>,
}

impl HashMapStore {
    /// Create a new HashMapStore with the given configuration.
    pub fn new(config: HashMapStoreConfig) -> Self {
        HashMapStore {
            state: RwLock::new(HashMap::new()),
            purge_on_set: config.purge_on_set,
        }
    }

    /// Run a purge if configured and the random check passes.
    async fn maybe_purge(&self) {
        let Some(ref config) = self.purge_on_set else {
            return;
        };

        if config.frequency <= 0.0 {
            return;
        }

        let should_purge = if config.frequency >= 1.0 {
            true
        } else {
            rand_simple() < config.frequency
        };

        if !should_purge {
            return;
        }

        let mut state = self.state.write().await;
        let now = now_ms();

        // First delete all expired entries
        state.retain(|_, entry| !entry.is_expired(now));

        // If still over max_items, remove the soonest-expiring entries
        if state.len() > config.max_items {
            let mut entries: Vec<_> = state
                .iter()
                .map(|(k, entry)| (k.clone(), entry.expires_at))
                .collect();
            entries.sort_by_key(|(_, expires_at)| *expires_at);

            let to_remove = state.len() - config.max_items;
            for (key, _) in entries.into_iter().take(to_remove) {
                state.remove(&key);
            }
        }
    }
}

#[async_trait]
impl Store for HashMapStore {
    fn name(&self) -> &'static str {
        "hashmap"
    }

    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let state = self.state.read().await;

        let entry = state.get(key)?;

        if entry.is_expired(now_ms()) {
            // Entry is expired, remove it
            drop(state);
            self.state.write().await.remove(key);
            return None;
        }

        Some(entry.clone())
    }

    async fn set(&self, key: &str, entry: CacheEntry) {
        {
            let mut state = self.state.write().await;
            state.insert(key.to_string(), entry);
        }

        self.maybe_purge().await;
    }

    async fn touch(&self, key: &str, expires_at: i64) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.get_mut(key) {
            entry.expires_at = expires_at;
        }
    }

    async fn remove(&self, keys: &[&str]) {
        let mut state = self.state.write().await;

        for key in keys {
            state.remove(*key);
        }
    }
}
