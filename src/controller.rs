use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;

use crate::cache::SharedCache;
use crate::coalescer::{Acquired, RequestCoalescer};
use crate::debounce::Debouncer;
use crate::entry::{Payload, downcast_payload};
use crate::error::{BoxError, FetchError};
use crate::options::{FetchOptions, Transform};
use crate::state::{FetchState, FetchStatus};

/// Produces the current resource identifier; may read external inputs.
pub type Resolver = Arc<dyn Fn() -> String + Send + Sync>;

/// The async producer performing the actual network/database call.
pub type Producer<V> = Arc<dyn Fn(String) -> BoxFuture<'static, Result<V, BoxError>> + Send + Sync>;

/// Per-consumer fetch orchestrator.
///
/// Combines cache lookup, request coalescing, retry with linearly growing
/// delays, cancellation/timeout, trigger debouncing and dependency-triggered
/// refetch. State is published through a `watch` channel so consumers can
/// subscribe to changes without any UI-framework binding.
///
/// Cloning the controller clones a handle to the same instance.
pub struct FetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<V>>,
}

impl<V> Clone for FetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        FetchController {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: Arc<SharedCache>,
    coalescer: Arc<RequestCoalescer>,
    resolver: Resolver,
    producer: Producer<V>,
    options: FetchOptions<V>,
    state: watch::Sender<FetchState<V>>,
    /// Monotonic stamp; a resolution only applies while its stamp is current.
    generation: AtomicU64,
    /// Cancellation mark: any operation with a generation at or below this
    /// value aborts.
    cancel: watch::Sender<u64>,
    disposed: AtomicBool,
    debouncer: Debouncer,
    dependencies: Mutex<Vec<Value>>,
}

/// Build the type-erased compute future for one attempt: run the producer,
/// apply the transform, box the payload. Shared with the paginated
/// controller's silent next-page prefetch.
pub(crate) fn erase_producer<V>(
    producer: &Producer<V>,
    transform: &Option<Transform<V>>,
    identifier: &str,
) -> BoxFuture<'static, Result<Payload, FetchError>>
where
    V: Clone + Send + Sync + 'static,
{
    let producer = Arc::clone(producer);
    let transform = transform.clone();
    let identifier = identifier.to_string();
    Box::pin(async move {
        let raw = producer(identifier.clone())
            .await
            .map_err(|err| FetchError::network(&identifier, err.to_string()))?;
        let value = match transform {
            Some(transform) => {
                transform(raw).map_err(|err| FetchError::transform(&identifier, err.to_string()))?
            }
            None => raw,
        };
        Ok(Arc::new(value) as Payload)
    })
}

/// Resolve once the cancellation mark reaches `generation`.
async fn wait_cancelled(mut cancel: watch::Receiver<u64>, generation: u64) {
    loop {
        if *cancel.borrow() >= generation {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender gone means the controller is gone; nothing to abort for
            std::future::pending::<()>().await;
        }
    }
}

impl<V> FetchController<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        cache: Arc<SharedCache>,
        coalescer: Arc<RequestCoalescer>,
        resolver: Resolver,
        producer: Producer<V>,
        options: FetchOptions<V>,
    ) -> Self {
        let (state, _) = watch::channel(FetchState::idle());
        let (cancel, _) = watch::channel(0_u64);
        let debouncer = Debouncer::new(options.debounce_delay);
        let dependencies = Mutex::new(options.dependencies.clone());

        let controller = FetchController {
            inner: Arc::new(Inner {
                cache,
                coalescer,
                resolver,
                producer,
                options,
                state,
                generation: AtomicU64::new(0),
                cancel,
                disposed: AtomicBool::new(false),
                debouncer,
                dependencies,
            }),
        };
        controller.on_create();
        controller
    }

    fn on_create(&self) {
        if self.inner.options.prefetch {
            // Silent warm-up: fetch without ever exposing the loading flag
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let _ = inner.run_fetch(false, true).await;
            });
        } else if self.inner.options.fetch_on_mount {
            self.trigger();
        }
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> FetchState<V> {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<FetchState<V>> {
        self.inner.state.subscribe()
    }

    /// Fetch through the cache and return the resolved payload.
    ///
    /// With `skip_cache` the cache read is bypassed (the fresh result is
    /// still written back, and concurrent forced fetches for the same
    /// identifier are still coalesced).
    pub async fn fetch(&self, skip_cache: bool) -> Result<V, FetchError> {
        Arc::clone(&self.inner).run_fetch(skip_cache, false).await
    }

    /// Fetch through the cache. Equivalent to `fetch(false)`.
    pub async fn refetch(&self) -> Result<V, FetchError> {
        self.fetch(false).await
    }

    /// Force a fresh fetch, bypassing the cache read. Equivalent to
    /// `fetch(true)`.
    pub async fn fetch_fresh(&self) -> Result<V, FetchError> {
        self.fetch(true).await
    }

    /// Fire-and-forget `fetch(false)`, routed through the debounce window.
    ///
    /// This is the trigger used by construction (`fetch_on_mount`) and by
    /// dependency changes; bursts inside the window collapse to a single
    /// trailing fetch.
    pub fn trigger(&self) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        self.inner.debouncer.call(move || async move {
            let _ = inner.run_fetch(false, false).await;
        });
    }

    /// Compare `dependencies` against the previously seen values; any
    /// difference triggers a (debounced) `fetch(false)`.
    pub fn dependencies_changed(&self, dependencies: &[Value]) {
        let changed = {
            let mut current = self.inner.dependencies.lock().unwrap();
            if current.as_slice() == dependencies {
                false
            } else {
                *current = dependencies.to_vec();
                true
            }
        };
        if changed {
            self.trigger();
        }
    }

    /// Abort the in-flight operation as observed by this controller only.
    ///
    /// Sets `Cancelled`, leaves `error` untouched and does not invoke
    /// `on_error`. Other controllers joined to the same coalesced identifier
    /// are unaffected. A no-op when nothing is in flight.
    pub fn cancel(&self) {
        let current = self.inner.generation.load(Ordering::SeqCst);
        self.inner.cancel.send_replace(current);
    }

    /// Mark the controller inactive.
    ///
    /// Idempotent. In-flight resolutions are discarded for state-update
    /// purposes, the cancellation mark fires, and no debounce/retry timer
    /// outlives the call.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel.send_replace(u64::MAX);
        self.inner.debouncer.disarm();
    }

    /// Whether `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<V> Inner<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Apply a state mutation unless this operation has been superseded or
    /// the controller disposed. Returns whether the mutation was applied.
    fn apply(&self, generation: u64, mutate: impl FnOnce(&mut FetchState<V>)) -> bool {
        if self.disposed.load(Ordering::SeqCst)
            || self.generation.load(Ordering::SeqCst) != generation
        {
            return false;
        }
        self.state.send_modify(|state| {
            mutate(state);
            state.generation = generation;
        });
        true
    }

    async fn run_fetch(self: Arc<Self>, skip_cache: bool, silent: bool) -> Result<V, FetchError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(FetchError::Aborted);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let identifier = (self.resolver)();
        let cache_key = self
            .options
            .cache_key
            .clone()
            .unwrap_or_else(|| identifier.clone());
        let cancel = self.cancel.subscribe();

        self.apply(generation, |state| {
            if !silent {
                state.status = FetchStatus::Loading;
            }
            if !self.options.keep_previous_data {
                state.data = None;
            }
            state.attempt = 0;
        });

        let mut attempt: u32 = 0;
        loop {
            let result = self
                .run_attempt(&identifier, &cache_key, skip_cache, cancel.clone(), generation)
                .await;

            match result {
                Ok(value) => {
                    self.apply(generation, |state| {
                        state.status = FetchStatus::Success;
                        state.data = Some(value.clone());
                        state.error = None;
                        state.attempt = 0;
                    });
                    return Ok(value);
                }
                Err(FetchError::Aborted) => {
                    self.apply(generation, |state| {
                        state.status = FetchStatus::Cancelled;
                    });
                    return Err(FetchError::Aborted);
                }
                Err(error) if error.is_retryable() && attempt < self.options.retry_count => {
                    attempt += 1;
                    debug!(
                        identifier = %identifier,
                        attempt,
                        "attempt failed, retrying: {error}"
                    );
                    self.apply(generation, |state| {
                        state.attempt = attempt;
                        if !silent {
                            state.status = FetchStatus::Loading;
                        }
                    });

                    // Linear growth by attempt number
                    let delay = self.options.retry_delay * attempt;
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = wait_cancelled(cancel.clone(), generation) => {
                            self.apply(generation, |state| {
                                state.status = FetchStatus::Cancelled;
                            });
                            return Err(FetchError::Aborted);
                        }
                    }

                    // Superseded while sleeping: stop without touching state
                    if self.generation.load(Ordering::SeqCst) != generation
                        || self.disposed.load(Ordering::SeqCst)
                    {
                        return Err(FetchError::Aborted);
                    }
                }
                Err(error) => {
                    let applied = self.apply(generation, |state| {
                        state.status = FetchStatus::Error;
                        state.error = Some(error.clone());
                    });
                    if applied && let Some(on_error) = &self.options.on_error {
                        on_error(&error);
                    }
                    return Err(error);
                }
            }
        }
    }

    /// One attempt: dispatch the operation and race it against cancellation
    /// and the configured timeout. The underlying coalesced work is detached,
    /// so losing the race abandons only this controller's wait.
    async fn run_attempt(
        &self,
        identifier: &str,
        cache_key: &str,
        skip_cache: bool,
        cancel: watch::Receiver<u64>,
        generation: u64,
    ) -> Result<V, FetchError> {
        let operation = self.dispatch(identifier, cache_key, skip_cache);
        tokio::pin!(operation);

        let payload = match self.options.timeout {
            Some(timeout) => {
                tokio::select! {
                    result = &mut operation => result,
                    _ = sleep(timeout) => Err(FetchError::timeout(identifier)),
                    _ = wait_cancelled(cancel, generation) => Err(FetchError::Aborted),
                }
            }
            None => {
                tokio::select! {
                    result = &mut operation => result,
                    _ = wait_cancelled(cancel, generation) => Err(FetchError::Aborted),
                }
            }
        }?;

        downcast_payload(&payload, identifier)
    }

    /// Route one operation through the configured path: coalesced cache
    /// lookup, coalesced forced fetch, or (with deduplication disabled) a
    /// direct producer call.
    async fn dispatch(
        &self,
        identifier: &str,
        cache_key: &str,
        skip_cache: bool,
    ) -> Result<Payload, FetchError> {
        if !self.options.deduplicate_requests {
            if !skip_cache && let Some(value) = self.cache.get(cache_key).await {
                return Ok(value);
            }
            let payload = erase_producer(&self.producer, &self.options.transform, identifier).await?;
            self.cache
                .set_with_options(
                    cache_key,
                    Arc::clone(&payload),
                    self.options.cache_ttl,
                    self.options.refresh_cache_on_access,
                )
                .await;
            return Ok(payload);
        }

        if skip_cache {
            // Forced refresh: bypass the cache read but still coalesce by
            // identifier, and write the fresh result back on success
            return match self.coalescer.acquire_or_join(identifier) {
                Acquired::Joiner { outcome } => outcome.recv().await,
                Acquired::Owner { permit, outcome } => {
                    let future = erase_producer(&self.producer, &self.options.transform, identifier);
                    let cache = Arc::clone(&self.cache);
                    let cache_key = cache_key.to_string();
                    let ttl = self.options.cache_ttl;
                    let refresh = self.options.refresh_cache_on_access;
                    tokio::spawn(async move {
                        let result = future.await;
                        if let Ok(ref payload) = result {
                            cache
                                .set_with_options(&cache_key, Arc::clone(payload), ttl, refresh)
                                .await;
                        }
                        permit.settle(result);
                    });
                    outcome.recv().await
                }
            };
        }

        self.cache
            .get_or_compute(
                cache_key,
                self.options.cache_ttl,
                self.options.refresh_cache_on_access,
                erase_producer(&self.producer, &self.options.transform, identifier),
            )
            .await
    }
}
