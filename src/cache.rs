use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use crate::coalescer::{Acquired, RequestCoalescer};
use crate::entry::{CacheEntry, Payload};
use crate::error::FetchError;
use crate::store::Store;
use crate::utils::now_ms;

/// Process-wide TTL cache shared by every controller in a [`Client`].
///
/// The cache is a correctness-and-freshness layer, not a capacity-bounded
/// one: entries live until their TTL expires or they are explicitly
/// invalidated. Capacity bounds, when wanted, are a property of the chosen
/// [`Store`].
///
/// [`Client`]: crate::client::Client
pub struct SharedCache {
    store: Arc<dyn Store>,
    coalescer: Arc<RequestCoalescer>,
}

impl SharedCache {
    /// Create a new cache over the given store, coalescing misses through the
    /// given registry.
    pub fn new(store: Arc<dyn Store>, coalescer: Arc<RequestCoalescer>) -> Self {
        SharedCache { store, coalescer }
    }

    /// Return the cached value.
    ///
    /// Returns `None` for misses. A hit on an entry with `refresh_on_access`
    /// pushes its expiry forward by the entry's original TTL.
    pub async fn get(&self, key: &str) -> Option<Payload> {
        let entry = self.store.get(key).await?;

        if entry.refresh_on_access {
            self.store
                .touch(key, entry.refreshed_expiry(now_ms()))
                .await;
        }

        Some(entry.value)
    }

    /// Set the value in the cache, overwriting any existing entry.
    pub async fn set(&self, key: &str, value: Payload, ttl: Duration) {
        self.store.set(key, CacheEntry::new(value, ttl, false)).await;
    }

    /// Set the value in the cache with refresh-on-access configured.
    pub async fn set_with_options(
        &self,
        key: &str,
        value: Payload,
        ttl: Duration,
        refresh_on_access: bool,
    ) {
        self.store
            .set(key, CacheEntry::new(value, ttl, refresh_on_access))
            .await;
    }

    /// Remove the key from the cache.
    pub async fn invalidate(&self, key: &str) {
        self.store.remove(&[key]).await;
    }

    /// Get the cached value or compute it, coalescing concurrent callers.
    ///
    /// On a hit the cached value is returned (extending the TTL if
    /// configured) without polling `compute`. On a miss the coalescer grants
    /// ownership to exactly one caller for this key: the owner drives
    /// `compute` in a detached task, stores the result on success and settles
    /// the operation; every concurrent caller for the same key observes the
    /// same outcome. On failure nothing is stored and the error propagates to
    /// all waiters.
    ///
    /// The detached task means a caller that stops waiting (cancel, timeout)
    /// never kills the operation other callers are joined to.
    ///
    /// `compute` must not fetch through this cache for the same key: the
    /// nested operation would join the slot owned by the outer one and
    /// neither would settle.
    pub async fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        refresh_on_access: bool,
        compute: BoxFuture<'static, Result<Payload, FetchError>>,
    ) -> Result<Payload, FetchError> {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        match self.coalescer.acquire_or_join(key) {
            Acquired::Joiner { outcome } => outcome.recv().await,
            Acquired::Owner { permit, outcome } => {
                // Another caller may have completed and populated the store
                // between our miss and gaining ownership
                if let Some(entry) = self.store.get(key).await {
                    permit.settle(Ok(entry.value));
                    return outcome.recv().await;
                }

                let store = Arc::clone(&self.store);
                let key = key.to_string();
                tokio::spawn(async move {
                    let result = compute.await;
                    if let Ok(ref value) = result {
                        store
                            .set(
                                &key,
                                CacheEntry::new(Arc::clone(value), ttl, refresh_on_access),
                            )
                            .await;
                        debug!(key = %key, "stored computed value");
                    }
                    permit.settle(result);
                });

                outcome.recv().await
            }
        }
    }
}
