//! Error types for the reader overlay.
//!
//! Only [`LifecycleError`] is ever surfaced to callers of the state store.
//! Everything else is caught at the boundary where it happens, logged, and
//! collapsed into a best-effort result.

use thiserror::Error;

/// An operation was attempted after teardown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("execution context has been invalidated")]
    ContextInvalidated,

    #[error("UI state store has been destroyed")]
    StoreDestroyed,
}

/// Persistent backend failure. Always caught where the backend is called.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("failed to read key {key}: {message}")]
    Read { key: String, message: String },

    #[error("failed to write key {key}: {message}")]
    Write { key: String, message: String },

    #[error("malformed value under key {key}: {message}")]
    Malformed { key: String, message: String },

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// The rendering collaborator could not mount the view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountError {
    #[error("render failed: {0}")]
    Render(String),

    #[error("mounting is not supported by this host: {0}")]
    Unsupported(String),
}

/// A document capability failed or is missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("DOM capability unavailable: {0}")]
    Unsupported(String),

    #[error("DOM operation failed: {0}")]
    Operation(String),
}

/// The host environment refused a timer or listener registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("timer registration failed: {0}")]
    Timer(String),

    #[error("listener registration failed: {0}")]
    Listener(String),
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A command event named no known reader command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reader command: {0:?}")]
pub struct UnknownCommand(pub String);

/// Why an activation attempt returned `false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivationFailure {
    #[error("reader view is already active")]
    AlreadyActive,

    #[error("a page snapshot is already live")]
    SessionLive,

    #[error("no readable content: {0}")]
    ExtractionFailed(String),

    #[error(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error(transparent)]
    State(#[from] LifecycleError),
}

impl ActivationFailure {
    /// Guard rejections leave no trace on the document or state.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            ActivationFailure::AlreadyActive | ActivationFailure::SessionLive
        )
    }
}
