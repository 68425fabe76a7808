use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;
use crate::utils::now_ms;

/// Type-erased cached value.
///
/// Values are stored as `Arc<dyn Any>` which can be cloned cheaply (just
/// increments the reference count) and downcast back to the original type at
/// the typed controller boundary. This lets one process-wide cache serve
/// controllers of many payload types without serialization overhead.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A cache entry containing a value and its expiration bookkeeping.
#[derive(Clone)]
pub struct CacheEntry {
    /// The cached value.
    pub value: Payload,

    /// Unix timestamp in milliseconds.
    /// A lookup at or after this point is a miss.
    pub expires_at: i64,

    /// The entry's original TTL in milliseconds, kept so a refresh-on-access
    /// hit can push `expires_at` forward by the same amount.
    pub ttl_ms: i64,

    /// Whether a hit extends `expires_at` to `now + ttl_ms`.
    pub refresh_on_access: bool,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now.
    pub fn new(value: Payload, ttl: Duration, refresh_on_access: bool) -> Self {
        let ttl_ms = ttl.as_millis() as i64;
        CacheEntry {
            value,
            expires_at: now_ms() + ttl_ms,
            ttl_ms,
            refresh_on_access,
        }
    }

    /// Check if the entry has expired and must be treated as a miss.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    /// The expiry this entry would have after a refresh-on-access hit.
    pub fn refreshed_expiry(&self, now_ms: i64) -> i64 {
        now_ms + self.ttl_ms
    }
}

/// Downcast a type-erased payload back to `V`, cloning the value out of the
/// `Arc`. A mismatch means the cache key is shared between controllers of
/// different payload types; it surfaces as a transform error.
pub fn downcast_payload<V>(payload: &Payload, identifier: &str) -> Result<V, FetchError>
where
    V: Clone + Send + Sync + 'static,
{
    payload
        .downcast_ref::<V>()
        .cloned()
        .ok_or_else(|| FetchError::transform(identifier, "payload type downcast failed"))
}
