//! Reader Overlay
//!
//! Toggles a reader view over an arbitrary host page from a browser
//! extension content script, and guarantees the page comes back exactly as
//! it was: on deactivation, on failed activation, and when the script's
//! execution context is invalidated underneath it.
//!
//! ```text
//! ValiditySignal ──► ResourceLifecycleManager ──► UiStateStore ──► PersistentStateBackend
//!                              │                       ▲
//!                              └──► ReaderViewController ──► ContentExtractor / ViewMounter
//! ```

pub mod backend;
pub mod commands;
pub mod config;
pub mod content;
pub mod controller;
pub mod document;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod mount;
pub mod state;
pub mod store;
pub mod validity;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use backend::{InMemoryBackend, PersistentStateBackend};
pub use commands::{install_command_bridge, CommandBridge, ReaderCommand};
pub use config::ReaderConfig;
pub use content::{ArticleTagExtractor, ContentExtractor, ExtractionResult, RawArticle, ReaderContent};
pub use controller::ReaderViewController;
pub use document::{MemoryDocument, PageDocument, PageSnapshot, OVERLAY_CONTAINER_ID};
pub use error::{
    ActivationFailure, BackendError, ConfigError, DomError, HostError, LifecycleError, MountError,
};
pub use host::manual::ManualHost;
pub use host::{HostEnvironment, HostEvent, ListenerTarget};
pub use lifecycle::{CleanupFn, ListenerHandle, ResourceLifecycleManager, TimerHandle};
pub use mount::{MarkupMounter, ViewMounter};
pub use state::{ActivationRecord, UiState};
pub use store::UiStateStore;
pub use validity::ValiditySignal;

#[cfg(target_arch = "wasm32")]
pub use web::ReaderOverlay;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    logging::init_logging();
    tracing::info!("reader overlay module loaded");
}
