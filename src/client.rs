use std::future::Future;
use std::sync::Arc;

use crate::cache::SharedCache;
use crate::coalescer::RequestCoalescer;
use crate::controller::{FetchController, Producer, Resolver};
use crate::error::BoxError;
use crate::options::{FetchOptions, PaginateOptions};
use crate::paginate::{NextPage, PageUrl, PaginatedFetchController};
use crate::store::Store;
use crate::stores::memory::{HashMapStore, HashMapStoreConfig};

/// Front door for the orchestration layer.
///
/// A `Client` owns the process-wide [`SharedCache`] and [`RequestCoalescer`]
/// pair and constructs controllers bound to them. Clone it freely; clones
/// share the same cache and coalescer.
#[derive(Clone)]
pub struct Client {
    cache: Arc<SharedCache>,
    coalescer: Arc<RequestCoalescer>,
}

impl Client {
    /// Create a client backed by an in-memory [`HashMapStore`].
    pub fn new() -> Self {
        Self::with_store(Arc::new(HashMapStore::new(HashMapStoreConfig::default())))
    }

    /// Create a client backed by the given store.
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        let coalescer = Arc::new(RequestCoalescer::new());
        let cache = Arc::new(SharedCache::new(store, Arc::clone(&coalescer)));
        Client { cache, coalescer }
    }

    /// The shared cache backing every controller of this client.
    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    /// The request coalescer shared by every controller of this client.
    pub fn coalescer(&self) -> &Arc<RequestCoalescer> {
        &self.coalescer
    }

    /// Explicitly invalidate a cached entry.
    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Create a fetch controller with a dynamic resource resolver.
    ///
    /// # Example
    /// ```ignore
    /// let controller = client.controller(
    ///     move || format!("/api/templates?team={team_id}"),
    ///     |url| async move { http_get_json(&url).await },
    ///     FetchOptions::default(),
    /// );
    /// ```
    pub fn controller<V, R, F, Fut>(
        &self,
        resolver: R,
        producer: F,
        options: FetchOptions<V>,
    ) -> FetchController<V>
    where
        V: Clone + Send + Sync + 'static,
        R: Fn() -> String + Send + Sync + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
    {
        let resolver: Resolver = Arc::new(resolver);
        let producer: Producer<V> = Arc::new(move |identifier| Box::pin(producer(identifier)));
        FetchController::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.coalescer),
            resolver,
            producer,
            options,
        )
    }

    /// Create a fetch controller for a fixed resource identifier.
    pub fn resource<V, F, Fut>(
        &self,
        identifier: &str,
        producer: F,
        options: FetchOptions<V>,
    ) -> FetchController<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
    {
        let identifier = identifier.to_string();
        self.controller(move || identifier.clone(), producer, options)
    }

    /// Create a paginated fetch controller.
    ///
    /// `page_url` maps a cursor (`None` for the first page) to a resource
    /// identifier; `next_page` extracts the following cursor from a loaded
    /// page, or `None` when the page set is exhausted.
    pub fn paginated<V, P, F, Fut, N>(
        &self,
        page_url: P,
        producer: F,
        next_page: N,
        options: PaginateOptions<V>,
    ) -> PaginatedFetchController<V>
    where
        V: Clone + Send + Sync + 'static,
        P: Fn(Option<&str>) -> String + Send + Sync + 'static,
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
        N: Fn(&V) -> Option<String> + Send + Sync + 'static,
    {
        let page_url: PageUrl = Arc::new(page_url);
        let producer: Producer<V> = Arc::new(move |identifier| Box::pin(producer(identifier)));
        let next_page: NextPage<V> = Arc::new(next_page);
        PaginatedFetchController::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.coalescer),
            page_url,
            producer,
            next_page,
            options,
        )
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
