/// Boxed error type accepted from producer and transform callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for fetch operations.
///
/// `FetchError` is `Clone` because a single coalesced failure is delivered to
/// every caller joined on the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The producer failed or returned a non-success indicator.
    #[error("network error for '{identifier}': {message}")]
    Network { identifier: String, message: String },
    /// The operation did not settle within the configured timeout.
    #[error("request for '{identifier}' timed out")]
    Timeout { identifier: String },
    /// The operation was cancelled locally via `cancel()` or disposal.
    #[error("request aborted")]
    Aborted,
    /// The transform step rejected the raw payload.
    #[error("transform error for '{identifier}': {message}")]
    Transform { identifier: String, message: String },
}

impl FetchError {
    /// Create a new network error.
    pub fn network(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Network {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(identifier: impl Into<String>) -> Self {
        FetchError::Timeout {
            identifier: identifier.into(),
        }
    }

    /// Create a new transform error.
    pub fn transform(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Transform {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    /// Whether a failed attempt with this error may be retried.
    ///
    /// Timeouts count like network failures for retry accounting. Aborts are
    /// a silent local termination and are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Aborted)
    }

    /// Whether this error is a local abort.
    pub fn is_aborted(&self) -> bool {
        matches!(self, FetchError::Aborted)
    }
}
