use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Lifecycle status of a controller's current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    /// No fetch has been issued yet.
    Idle,
    /// A fetch (or retry) is in flight.
    Loading,
    /// The last fetch resolved successfully.
    Success,
    /// The last fetch failed terminally.
    Error,
    /// The in-flight fetch was cancelled locally; a fresh fetch may follow.
    Cancelled,
}

/// Snapshot of a controller's state, owned exclusively by one controller
/// instance and mutated only by that controller's own resolution callbacks.
#[derive(Debug, Clone)]
pub struct FetchState<V> {
    /// Last successful payload, or `None` before the first success.
    pub data: Option<V>,
    /// Current lifecycle status.
    pub status: FetchStatus,
    /// Terminal error of the last fetch, cleared on success.
    pub error: Option<FetchError>,
    /// Retry attempt number of the in-flight fetch (0 outside retries).
    pub attempt: u32,
    /// Generation stamp of the operation that last mutated this state.
    /// Resolutions carrying a stale generation are discarded.
    pub generation: u64,
}

impl<V> FetchState<V> {
    pub(crate) fn idle() -> Self {
        FetchState {
            data: None,
            status: FetchStatus::Idle,
            error: None,
            attempt: 0,
            generation: 0,
        }
    }

    /// Whether a fetch is currently in flight.
    pub fn is_loading(&self) -> bool {
        self.status == FetchStatus::Loading
    }

    /// Whether the last fetch resolved successfully.
    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }

    /// Whether the last fetch failed terminally.
    pub fn is_error(&self) -> bool {
        self.status == FetchStatus::Error
    }
}

impl<V> Default for FetchState<V> {
    fn default() -> Self {
        Self::idle()
    }
}
