//! Error types for the offline worker.

use loanshell_net::NetError;
use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Result type alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur in worker operations.
///
/// A cache miss is not an error: lookups return `Option`.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A precache URL failed or answered non-2xx. Fatal to that install only.
    #[error("Install failed fetching {url}: {reason}")]
    InstallFetchFailure { url: String, reason: String },

    /// The network rejected and no cached copy could stand in.
    #[error("Network unavailable for {url}: {source}")]
    NetworkUnavailable {
        url: String,
        #[source]
        source: NetError,
    },

    /// Deferred sync failed; the host is expected to retry later.
    #[error("Background sync '{tag}' failed: {reason}")]
    BackgroundSyncFailure { tag: String, reason: String },

    /// Lifecycle transition not allowed from the current state.
    #[error("Cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: LifecycleState,
    },

    /// Storage failure in the cache registry.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Bad worker configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Notification not found (already closed or never shown).
    #[error("Notification not found: {0}")]
    NotificationNotFound(u64),
}

impl WorkerError {
    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the host should schedule a retry of the triggering event.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::BackgroundSyncFailure { .. } | WorkerError::NetworkUnavailable { .. }
        )
    }
}

impl From<rusqlite::Error> for WorkerError {
    fn from(e: rusqlite::Error) -> Self {
        WorkerError::Registry(e.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(e: serde_json::Error) -> Self {
        WorkerError::Config(e.to_string())
    }
}
