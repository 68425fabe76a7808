//! Metrics middleware for cache stores.
//!
//! This module provides a `MetricsStore` wrapper that emits metrics for all
//! cache operations (reads, writes, removes) to a user-provided sink.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use refetch::{Client, HashMapStore, HashMapStoreConfig, MetricsStore, Store};
//!
//! let sink = Arc::new(MySink::new());
//! let memory = Arc::new(HashMapStore::new(HashMapStoreConfig::default()));
//! let store: Arc<dyn Store> = Arc::new(MetricsStore::new(memory, sink.clone()));
//!
//! // Use in a Client - metrics emitted automatically
//! let client = Client::with_store(store);
//! ```

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::entry::CacheEntry;
use crate::store::Store;

/// Metrics emitted by the MetricsStore wrapper.
#[derive(Debug, Clone, Serialize)]
pub enum CacheMetric {
    /// Emitted on every cache read (get) operation.
    Read {
        /// The cache key that was read.
        key: String,
        /// Whether the key was found in the cache.
        hit: bool,
        /// Latency of the operation in milliseconds.
        latency_ms: f64,
        /// Name of the wrapped store (from Store::name()).
        store: String,
    },
    /// Emitted on every cache write (set or touch) operation.
    Write {
        /// The cache key that was written.
        key: String,
        /// Latency of the operation in milliseconds.
        latency_ms: f64,
        /// Name of the wrapped store (from Store::name()).
        store: String,
    },
    /// Emitted on every cache remove operation.
    Remove {
        /// Number of keys in the remove batch.
        key_count: usize,
        /// Latency of the operation in milliseconds.
        latency_ms: f64,
        /// Name of the wrapped store (from Store::name()).
        store: String,
    },
}

/// Trait for receiving cache metrics.
///
/// `emit` is called synchronously in the hot path of cache operations.
/// Implementations should be fast (e.g., buffer metrics in memory).
pub trait MetricsSink: Send + Sync {
    /// Emit a single metric.
    fn emit(&self, metric: CacheMetric);
}

/// Store decorator that emits a metric for every operation.
pub struct MetricsStore {
    inner: Arc<dyn Store>,
    sink: Arc<dyn MetricsSink>,
}

impl MetricsStore {
    /// Wrap a store so that every operation emits a metric to `sink`.
    pub fn new(inner: Arc<dyn Store>, sink: Arc<dyn MetricsSink>) -> Self {
        MetricsStore { inner, sink }
    }
}

#[async_trait]
impl Store for MetricsStore {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let start = Instant::now();
        let result = self.inner.get(key).await;

        self.sink.emit(CacheMetric::Read {
            key: key.to_string(),
            hit: result.is_some(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            store: self.inner.name().to_string(),
        });

        result
    }

    async fn set(&self, key: &str, entry: CacheEntry) {
        let start = Instant::now();
        self.inner.set(key, entry).await;

        self.sink.emit(CacheMetric::Write {
            key: key.to_string(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            store: self.inner.name().to_string(),
        });
    }

    async fn touch(&self, key: &str, expires_at: i64) {
        let start = Instant::now();
        self.inner.touch(key, expires_at).await;

        self.sink.emit(CacheMetric::Write {
            key: key.to_string(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            store: self.inner.name().to_string(),
        });
    }

    async fn remove(&self, keys: &[&str]) {
        let start = Instant::now();
        self.inner.remove(keys).await;

        self.sink.emit(CacheMetric::Remove {
            key_count: keys.len(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            store: self.inner.name().to_string(),
        });
    }
}
