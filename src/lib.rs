//! refetch - data-fetching orchestration for async consumers
//!
//! This library sits between in-process consumers and network resources and
//! provides:
//! - TTL caching with optional refresh-on-access
//! - Deduplication of concurrent operations per resource identifier
//! - Retry with linearly growing delays, cancellation and timeouts
//! - Trigger debouncing and dependency-triggered refetch
//! - Cursor-based pagination with background next-page prefetch
//!
//! # Example
//!
//! ```ignore
//! use refetch::{Client, FetchOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::new();
//!
//!     let templates = client.resource(
//!         "/api/templates",
//!         |url| async move {
//!             // Perform the actual network call - any error becomes a
//!             // retryable network error
//!             fetch_json(&url).await
//!         },
//!         FetchOptions {
//!             cache_ttl: Duration::from_secs(60),
//!             retry_count: 2,
//!             ..FetchOptions::default()
//!         },
//!     );
//!
//!     // Await results imperatively, subscribe, or poll snapshots
//!     let payload = templates.refetch().await;
//!     let state = templates.snapshot();
//! }
//! ```

mod cache;
mod client;
mod coalescer;
mod controller;
mod debounce;
mod entry;
mod error;
mod options;
mod paginate;
mod state;
mod store;
pub mod stores;
mod utils;

// Re-export public API
pub use cache::SharedCache;
pub use client::Client;
pub use coalescer::{Acquired, Outcome, OutcomeReceiver, RequestCoalescer, SettlePermit};
pub use controller::{FetchController, Producer, Resolver};
pub use debounce::Debouncer;
pub use entry::{CacheEntry, Payload, downcast_payload};
pub use error::{BoxError, FetchError};
pub use options::{FetchOptions, OnError, PaginateOptions, Transform};
pub use paginate::{NextPage, Page, PageState, PageUrl, PaginatedFetchController};
pub use state::{FetchState, FetchStatus};
pub use store::Store;
pub use stores::memory::{HashMapStore, HashMapStoreConfig, PurgeOnSetConfig};
pub use stores::metrics::{CacheMetric, MetricsSink, MetricsStore};
pub use stores::moka::{MokaStore, MokaStoreConfig};
