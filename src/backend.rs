//! Persistent state backend abstraction.
//!
//! The backend is advisory: in-memory state is the truth for the current
//! context, and every backend failure is caught by the caller. Browser
//! builds use `crate::web::WebStorageBackend`; [`InMemoryBackend`] backs
//! native hosts and tests.

use crate::error::BackendError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Async key-value store surviving across activations within a session.
#[async_trait(?Send)]
pub trait PersistentStateBackend {
    /// `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError>;

    /// Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<(), BackendError>;
}

/// Read and decode a typed value. Undecodable values are `Malformed`.
pub async fn load<T: DeserializeOwned>(
    backend: &dyn PersistentStateBackend,
    key: &str,
) -> Result<Option<T>, BackendError> {
    let Some(value) = backend.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| BackendError::Malformed {
            key: key.to_string(),
            message: e.to_string(),
        })
}

/// Encode and write a typed value.
pub async fn save<T: Serialize>(
    backend: &dyn PersistentStateBackend,
    key: &str,
    value: &T,
) -> Result<(), BackendError> {
    let value = serde_json::to_value(value).map_err(|e| BackendError::Write {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    backend.set(key, value).await
}

/// Completes on the second poll, giving other tasks a turn.
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    values: RefCell<HashMap<String, Value>>,
    fail_reads: Cell<bool>,
    fail_writes: Cell<bool>,
    yield_on_io: Cell<bool>,
    reads: Cell<usize>,
    writes: Cell<usize>,
}

/// Process-local backend. Clones share the same map.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Rc<MemoryInner>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write directly, bypassing failure injection (an external writer).
    pub fn insert(&self, key: &str, value: Value) {
        self.inner
            .values
            .borrow_mut()
            .insert(key.to_string(), value);
    }

    /// Read directly, bypassing failure injection.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.inner.values.borrow().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.values.borrow().contains_key(key)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.set(fail);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.set(fail);
    }

    /// Suspend once on every operation, like a real async store.
    pub fn yield_on_io(&self, enabled: bool) {
        self.inner.yield_on_io.set(enabled);
    }

    pub fn read_count(&self) -> usize {
        self.inner.reads.get()
    }

    pub fn write_count(&self) -> usize {
        self.inner.writes.get()
    }

    async fn io_turn(&self) {
        if self.inner.yield_on_io.get() {
            YieldNow { yielded: false }.await;
        }
    }
}

#[async_trait(?Send)]
impl PersistentStateBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        self.io_turn().await;
        self.inner.reads.set(self.inner.reads.get() + 1);
        if self.inner.fail_reads.get() {
            return Err(BackendError::Read {
                key: key.to_string(),
                message: "injected read failure".into(),
            });
        }
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        self.io_turn().await;
        self.inner.writes.set(self.inner.writes.get() + 1);
        if self.inner.fail_writes.get() {
            return Err(BackendError::Write {
                key: key.to_string(),
                message: "injected write failure".into(),
            });
        }
        self.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.io_turn().await;
        self.inner.writes.set(self.inner.writes.get() + 1);
        if self.inner.fail_writes.get() {
            return Err(BackendError::Write {
                key: key.to_string(),
                message: "injected remove failure".into(),
            });
        }
        self.inner.values.borrow_mut().remove(key);
        Ok(())
    }
}
