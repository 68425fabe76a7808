use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::debug;

use crate::cache::SharedCache;
use crate::coalescer::RequestCoalescer;
use crate::controller::{FetchController, Producer, Resolver, erase_producer};
use crate::error::FetchError;
use crate::options::{PaginateOptions, Transform};

/// Produces the resource identifier for a page, given its cursor.
pub type PageUrl = Arc<dyn Fn(Option<&str>) -> String + Send + Sync>;

/// Extracts the next page's cursor from a loaded page, or `None` when the
/// page set is exhausted.
pub type NextPage<V> = Arc<dyn Fn(&V) -> Option<String> + Send + Sync>;

/// One loaded page.
#[derive(Debug, Clone)]
pub struct Page<V> {
    /// Cursor this page was requested with (`None` for the first page).
    pub cursor: Option<String>,
    /// The page payload, in request order.
    pub items: V,
    /// Cursor of the following page, if any.
    pub next_cursor: Option<String>,
}

/// Snapshot of a paginated controller's state.
#[derive(Debug, Clone)]
pub struct PageState<V> {
    /// Pages in strict request order.
    pub pages: Vec<Page<V>>,
    /// Whether another page can be requested.
    pub has_next: bool,
    /// Whether a `load_more` is in flight.
    pub is_loading_more: bool,
    /// Terminal error of the last page load, cleared by the next success.
    pub error: Option<FetchError>,
}

impl<V> PageState<V> {
    fn initial() -> Self {
        PageState {
            pages: Vec::new(),
            has_next: true,
            is_loading_more: false,
            error: None,
        }
    }
}

/// Sequences Fetch Controller operations into an ordered, appendable page
/// list with optional background next-page prefetch.
///
/// Pages are requested and appended strictly sequentially; the controller
/// never issues two `load_more` operations concurrently for itself.
pub struct PaginatedFetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<V>>,
}

impl<V> Clone for PaginatedFetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        PaginatedFetchController {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    fetcher: FetchController<V>,
    cache: Arc<SharedCache>,
    page_url: PageUrl,
    producer: Producer<V>,
    transform: Option<Transform<V>>,
    next_page: NextPage<V>,
    prefetch_next_page: bool,
    initial_cursor: Option<String>,
    cache_ttl: std::time::Duration,
    refresh_cache_on_access: bool,
    cursor: Arc<Mutex<Option<String>>>,
    state: watch::Sender<PageState<V>>,
    /// Single-flight guard: only one `load_more` at a time.
    loading: AtomicBool,
    /// Single-flight guard for the background next-page prefetch.
    prefetching: AtomicBool,
    /// Bumped by `reset`; a load that finishes under a stale epoch discards
    /// its append.
    epoch: AtomicU64,
}

impl<V> PaginatedFetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        cache: Arc<SharedCache>,
        coalescer: Arc<RequestCoalescer>,
        page_url: PageUrl,
        producer: Producer<V>,
        next_page: NextPage<V>,
        options: PaginateOptions<V>,
    ) -> Self {
        let cursor = Arc::new(Mutex::new(options.initial_cursor.clone()));

        // The inner fetcher resolves its identifier from the live cursor;
        // the paginator drives every load itself
        let resolver: Resolver = {
            let cursor = Arc::clone(&cursor);
            let page_url = Arc::clone(&page_url);
            Arc::new(move || {
                let cursor = cursor.lock().unwrap();
                page_url(cursor.as_deref())
            })
        };

        let mut fetch_options = options.fetch.clone();
        let fetch_on_mount = fetch_options.fetch_on_mount;
        fetch_options.fetch_on_mount = false;
        fetch_options.prefetch = false;
        let cache_ttl = fetch_options.cache_ttl;
        let refresh_cache_on_access = fetch_options.refresh_cache_on_access;
        let transform = fetch_options.transform.clone();

        let fetcher = FetchController::new(
            Arc::clone(&cache),
            coalescer,
            resolver,
            Arc::clone(&producer),
            fetch_options,
        );

        let (state, _) = watch::channel(PageState::initial());

        let controller = PaginatedFetchController {
            inner: Arc::new(Inner {
                fetcher,
                cache,
                page_url,
                producer,
                transform,
                next_page,
                prefetch_next_page: options.prefetch_next_page,
                initial_cursor: options.initial_cursor,
                cache_ttl,
                refresh_cache_on_access,
                cursor,
                state,
                loading: AtomicBool::new(false),
                prefetching: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
        };

        if fetch_on_mount {
            controller.spawn_load();
        }
        controller
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> PageState<V> {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<PageState<V>> {
        self.inner.state.subscribe()
    }

    /// Load the next page and append it to the page set.
    ///
    /// A no-op when the page set is exhausted or a load is already in
    /// flight.
    pub async fn load_more(&self) -> Result<(), FetchError> {
        let inner = &self.inner;

        if !inner.state.borrow().has_next {
            return Ok(());
        }
        if inner.loading.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let epoch = inner.epoch.load(Ordering::SeqCst);
        let cursor = inner.cursor.lock().unwrap().clone();
        inner.state.send_modify(|state| {
            state.is_loading_more = true;
        });

        let result = inner.fetcher.fetch(false).await;

        // A reset happened while this page was loading: the fresh load owns
        // the state now, drop this resolution entirely
        if inner.epoch.load(Ordering::SeqCst) != epoch {
            return Ok(());
        }

        match result {
            Ok(items) => {
                let next_cursor = (inner.next_page)(&items);
                *inner.cursor.lock().unwrap() = next_cursor.clone();

                let page = Page {
                    cursor,
                    items,
                    next_cursor: next_cursor.clone(),
                };
                inner.state.send_modify(|state| {
                    state.pages.push(page);
                    state.has_next = next_cursor.is_some();
                    state.is_loading_more = false;
                    state.error = None;
                });
                inner.loading.store(false, Ordering::SeqCst);

                if let Some(next) = next_cursor {
                    self.spawn_prefetch(next);
                }
                Ok(())
            }
            Err(error) => {
                inner.state.send_modify(|state| {
                    state.is_loading_more = false;
                    if !error.is_aborted() {
                        state.error = Some(error.clone());
                    }
                });
                inner.loading.store(false, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    /// Clear the page set, restore the initial cursor and load the first
    /// page afresh.
    pub fn reset(&self) {
        let inner = &self.inner;

        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.fetcher.cancel();
        *inner.cursor.lock().unwrap() = inner.initial_cursor.clone();
        inner.loading.store(false, Ordering::SeqCst);
        inner.state.send_replace(PageState::initial());

        self.spawn_load();
    }

    /// Mark the controller inactive. Idempotent.
    pub fn dispose(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.fetcher.dispose();
    }

    fn spawn_load(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            let _ = controller.load_more().await;
        });
    }

    /// Silently warm the cache for the page at `cursor` without touching the
    /// visible page set. Single-flight per controller.
    fn spawn_prefetch(&self, cursor: String) {
        let inner = Arc::clone(&self.inner);

        if !inner.prefetch_next_page {
            return;
        }
        if inner.prefetching.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(async move {
            let identifier = (inner.page_url)(Some(&cursor));
            let compute = erase_producer(&inner.producer, &inner.transform, &identifier);
            if let Err(error) = inner
                .cache
                .get_or_compute(
                    &identifier,
                    inner.cache_ttl,
                    inner.refresh_cache_on_access,
                    compute,
                )
                .await
            {
                debug!(identifier = %identifier, "next-page prefetch failed: {error}");
            }
            inner.prefetching.store(false, Ordering::SeqCst);
        });
    }
}
