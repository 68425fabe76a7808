use async_trait::async_trait;

use crate::entry::CacheEntry;

/// A store is a common interface for the shared cache's backing map.
///
/// Stores hold type-erased `CacheEntry` values keyed by resolved resource
/// identifier. The store implementation is responsible for treating expired
/// entries as misses and cleaning them up on its own.
#[async_trait]
pub trait Store: Send + Sync {
    /// A name for metrics/tracing.
    ///
    /// # Example
    /// - "hashmap"
    /// - "moka"
    fn name(&self) -> &'static str;

    /// Return the cached entry.
    ///
    /// The response must be `None` for misses, including entries past their
    /// `expires_at`.
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Sets the entry for the given key, overwriting any existing entry.
    async fn set(&self, key: &str, entry: CacheEntry);

    /// Push an existing entry's expiry forward (refresh-on-access support).
    ///
    /// A no-op if the key is absent.
    async fn touch(&self, key: &str, expires_at: i64);

    /// Removes the key(s) from the store.
    async fn remove(&self, keys: &[&str]);
}
