use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::sleep;

/// Trailing-edge debounce adapter for fetch triggers.
///
/// Each call supersedes any call still waiting out the quiet window, so a
/// burst of triggers collapses to a single invocation of the last one. A
/// zero delay runs every call immediately.
pub struct Debouncer {
    delay: Duration,
    sequence: Arc<AtomicU64>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet window.
    pub fn new(delay: Duration) -> Self {
        Debouncer {
            delay,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule `action` after the quiet window, superseding any scheduled
    /// call that has not yet fired.
    pub fn call<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        if self.delay.is_zero() {
            tokio::spawn(action());
            return;
        }

        let sequence = Arc::clone(&self.sequence);
        let delay = self.delay;
        tokio::spawn(async move {
            sleep(delay).await;
            // Only the last trigger inside the window runs
            if sequence.load(Ordering::SeqCst) == token {
                action().await;
            }
        });
    }

    /// Invalidate any scheduled call without running it.
    pub fn disarm(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
    }
}
