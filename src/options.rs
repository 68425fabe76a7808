use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{BoxError, FetchError};

/// Transform applied to the raw payload before it is stored and exposed.
pub type Transform<V> = Arc<dyn Fn(V) -> Result<V, BoxError> + Send + Sync>;

/// Callback invoked exactly once per terminal (non-abort) failure.
pub type OnError = Arc<dyn Fn(&FetchError) + Send + Sync>;

/// Configuration for a [`FetchController`].
///
/// All fields are optional in spirit: `Default` provides the stated
/// defaults, and consumers override only what they need.
///
/// [`FetchController`]: crate::controller::FetchController
pub struct FetchOptions<V> {
    /// Cache key override. Defaults to the resolved resource identifier.
    pub cache_key: Option<String>,

    /// How long a cached payload stays valid. Default 5 minutes.
    pub cache_ttl: Duration,

    /// Whether a cache hit pushes the entry's expiry forward by its original
    /// TTL. Default true.
    pub refresh_cache_on_access: bool,

    /// Comparison values; a change in any value (compared by equality)
    /// triggers an automatic fetch. See
    /// [`FetchController::dependencies_changed`].
    ///
    /// [`FetchController::dependencies_changed`]: crate::controller::FetchController::dependencies_changed
    pub dependencies: Vec<Value>,

    /// Fetch immediately at construction. Default true.
    pub fetch_on_mount: bool,

    /// Keep `data` visible while a refetch is loading. Default true.
    pub keep_previous_data: bool,

    /// How many times a retryable failure is retried. Default 0.
    pub retry_count: u32,

    /// Base unit for the retry delay; attempt `n` waits `retry_delay * n`.
    /// Default 1 second.
    pub retry_delay: Duration,

    /// Warm up silently at construction instead of fetching with a visible
    /// loading state. Default false.
    pub prefetch: bool,

    /// Quiet window for trigger debouncing; zero disables it. Default zero.
    pub debounce_delay: Duration,

    /// Abort an attempt that has not settled within this duration,
    /// classified as a timeout error. Default none.
    pub timeout: Option<Duration>,

    /// Coalesce concurrent operations for the same identifier. Default true.
    pub deduplicate_requests: bool,

    /// Transform applied to the raw payload before storing. Default identity.
    pub transform: Option<Transform<V>>,

    /// Invoked exactly once per terminal (non-abort) failure.
    pub on_error: Option<OnError>,
}

impl<V> Default for FetchOptions<V> {
    fn default() -> Self {
        FetchOptions {
            cache_key: None,
            cache_ttl: Duration::from_secs(5 * 60),
            refresh_cache_on_access: true,
            dependencies: Vec::new(),
            fetch_on_mount: true,
            keep_previous_data: true,
            retry_count: 0,
            retry_delay: Duration::from_millis(1000),
            prefetch: false,
            debounce_delay: Duration::ZERO,
            timeout: None,
            deduplicate_requests: true,
            transform: None,
            on_error: None,
        }
    }
}

impl<V> Clone for FetchOptions<V> {
    fn clone(&self) -> Self {
        FetchOptions {
            cache_key: self.cache_key.clone(),
            cache_ttl: self.cache_ttl,
            refresh_cache_on_access: self.refresh_cache_on_access,
            dependencies: self.dependencies.clone(),
            fetch_on_mount: self.fetch_on_mount,
            keep_previous_data: self.keep_previous_data,
            retry_count: self.retry_count,
            retry_delay: self.retry_delay,
            prefetch: self.prefetch,
            debounce_delay: self.debounce_delay,
            timeout: self.timeout,
            deduplicate_requests: self.deduplicate_requests,
            transform: self.transform.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<V> FetchOptions<V> {
    /// Set the transform applied to raw payloads.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(V) -> Result<V, BoxError> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Set the terminal-error callback.
    pub fn with_on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&FetchError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }
}

/// Configuration for a [`PaginatedFetchController`].
///
/// [`PaginatedFetchController`]: crate::paginate::PaginatedFetchController
pub struct PaginateOptions<V> {
    /// Retry/cache/error options shared with single-resource fetching.
    pub fetch: FetchOptions<V>,

    /// After a page loads, silently warm the cache for the following page.
    /// Default false.
    pub prefetch_next_page: bool,

    /// Cursor for the first page. Default none.
    pub initial_cursor: Option<String>,
}

impl<V> Default for PaginateOptions<V> {
    fn default() -> Self {
        PaginateOptions {
            fetch: FetchOptions::default(),
            prefetch_next_page: false,
            initial_cursor: None,
        }
    }
}

impl<V> Clone for PaginateOptions<V> {
    fn clone(&self) -> Self {
        PaginateOptions {
            fetch: self.fetch.clone(),
            prefetch_next_page: self.prefetch_next_page,
            initial_cursor: self.initial_cursor.clone(),
        }
    }
}
