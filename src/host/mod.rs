//! Host environment seam.
//!
//! Timers, event listeners and task spawning all go through
//! [`HostEnvironment`] so the lifecycle manager can reverse them. The browser
//! implementation lives in `crate::web`; [`manual::ManualHost`] is a
//! deterministic single-threaded host with a virtual clock.

pub mod manual;

use crate::error::HostError;
use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

/// Raw timer id as issued by the host. Always positive.
pub type TimerId = i32;

/// Raw listener key as issued by the host.
pub type ListenerKey = u64;

/// Listener callback. Shared so the host can keep it alive while attached.
pub type EventListener = Rc<dyn Fn(&HostEvent)>;

/// Where a listener is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerTarget {
    Window,
    Document,
    /// Element looked up by id at registration time.
    Element(String),
}

/// A DOM event reduced to what the overlay cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEvent {
    pub event_type: String,
    /// `KeyboardEvent.key`, for keyboard events.
    pub key: Option<String>,
    /// `CustomEvent.detail`, converted to JSON.
    pub detail: serde_json::Value,
}

impl HostEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            key: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn key_down(key: impl Into<String>) -> Self {
        Self {
            event_type: "keydown".to_string(),
            key: Some(key.into()),
            detail: serde_json::Value::Null,
        }
    }

    pub fn custom(event_type: impl Into<String>, detail: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            key: None,
            detail,
        }
    }
}

/// Subset of `AddEventListenerOptions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
}

/// Side-effecting primitives of the hosting environment.
///
/// Single-threaded: nothing here is `Send`.
pub trait HostEnvironment {
    fn set_timeout(&self, callback: Box<dyn FnOnce()>, delay_ms: u32)
        -> Result<TimerId, HostError>;

    fn clear_timeout(&self, id: TimerId);

    fn set_interval(&self, callback: Rc<dyn Fn()>, interval_ms: u32)
        -> Result<TimerId, HostError>;

    fn clear_interval(&self, id: TimerId);

    fn add_event_listener(
        &self,
        target: &ListenerTarget,
        event_type: &str,
        listener: EventListener,
        options: ListenerOptions,
    ) -> Result<ListenerKey, HostError>;

    /// Unknown keys are ignored.
    fn remove_event_listener(&self, key: ListenerKey);

    /// Run a task on the host's event loop.
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>);

    fn now(&self) -> DateTime<Utc>;
}
