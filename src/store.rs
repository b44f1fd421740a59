//! UI State Store
//!
//! Single source of truth for "is the reader view active" within one
//! execution context, mirrored to the persistent backend and observable by
//! subscribers.
//!
//! ## Flow
//!
//! ```text
//! set_*() ──► replace UiState ──► notify subscribers ──► backend write
//!                                                      (errors reported,
//!                                                       never rolled back)
//!
//! sync interval ──► backend read ──► differs? ──► replace + notify
//! ```
//!
//! Reconciliation yields to local changes: a tick is skipped while a write
//! is pending, and a read is discarded if local state changed while it was
//! suspended.

use crate::backend::{self, PersistentStateBackend};
use crate::error::{BackendError, LifecycleError};
use crate::lifecycle::{panic_message, CleanupFn, ResourceLifecycleManager, TimerHandle};
use crate::state::{ActivationRecord, UiState};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, warn};

/// Subscriber callback: `(new_state, previous_state)`.
pub type StateChangeListener = Rc<dyn Fn(&UiState, &UiState)>;

/// Receives every backend error the store swallows.
pub type ErrorSink = Rc<dyn Fn(&BackendError)>;

struct StoreInner {
    manager: ResourceLifecycleManager,
    backend: Rc<dyn PersistentStateBackend>,
    state_key: String,
    state: RefCell<UiState>,
    /// Bumped on every local replacement.
    revision: Cell<u64>,
    seeded: Cell<bool>,
    listeners: RefCell<Vec<StateChangeListener>>,
    error_sink: RefCell<Option<ErrorSink>>,
    sync_timer: Cell<Option<TimerHandle>>,
    sync_in_flight: Cell<bool>,
    pending_writes: Cell<u32>,
    destroyed: Cell<bool>,
    cleanup: RefCell<Option<CleanupFn>>,
}

impl StoreInner {
    fn replace_state(&self, next: UiState) -> bool {
        let previous = {
            let mut state = self.state.borrow_mut();
            if *state == next {
                return false;
            }
            std::mem::replace(&mut *state, next.clone())
        };
        self.revision.set(self.revision.get() + 1);
        self.notify(&next, &previous);
        true
    }

    fn notify(&self, next: &UiState, previous: &UiState) {
        let listeners: Vec<StateChangeListener> = self.listeners.borrow().clone();
        for listener in listeners {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(next, previous)))
            {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    "state change listener panicked"
                );
            }
        }
    }

    fn report(&self, err: &BackendError) {
        warn!(error = %err, "persistent backend operation failed");
        let sink = self.error_sink.borrow().clone();
        if let Some(sink) = sink {
            sink(err);
        }
    }

    fn stop_sync(&self) {
        if let Some(handle) = self.sync_timer.take() {
            self.manager.clear_interval(handle);
            debug!("storage sync stopped");
        }
    }

    fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        self.stop_sync();
        self.listeners.borrow_mut().clear();
        self.error_sink.borrow_mut().take();
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            self.manager.unregister_cleanup(&cleanup);
        }
        info!("UI state store destroyed");
    }
}

/// Authoritative in-process reader view state.
///
/// Clones share the same store.
#[derive(Clone)]
pub struct UiStateStore {
    inner: Rc<StoreInner>,
}

impl UiStateStore {
    /// Create the store and start seeding it from the backend.
    ///
    /// The store tears itself down when the manager's context is
    /// invalidated. A store created on a dead context starts destroyed.
    pub fn new(
        manager: ResourceLifecycleManager,
        backend: Rc<dyn PersistentStateBackend>,
        state_key: impl Into<String>,
    ) -> Self {
        let inner = Rc::new(StoreInner {
            manager: manager.clone(),
            backend,
            state_key: state_key.into(),
            state: RefCell::new(UiState::inactive()),
            revision: Cell::new(0),
            seeded: Cell::new(false),
            listeners: RefCell::new(Vec::new()),
            error_sink: RefCell::new(None),
            sync_timer: Cell::new(None),
            sync_in_flight: Cell::new(false),
            pending_writes: Cell::new(0),
            destroyed: Cell::new(false),
            cleanup: RefCell::new(None),
        });

        let weak: Weak<StoreInner> = Rc::downgrade(&inner);
        let cleanup: CleanupFn = Rc::new(move || -> anyhow::Result<()> {
            if let Some(inner) = weak.upgrade() {
                inner.destroy();
            }
            Ok(())
        });

        if !manager.register_cleanup(cleanup.clone()) {
            warn!("UI state store created on an invalidated context");
            inner.destroyed.set(true);
            return Self { inner };
        }
        *inner.cleanup.borrow_mut() = Some(cleanup);

        let store = Self { inner };
        let seeding = store.clone();
        manager.spawn(async move { seeding.load_initial_state().await });
        store
    }

    fn ensure_alive(&self) -> Result<(), LifecycleError> {
        if self.inner.destroyed.get() {
            Err(LifecycleError::StoreDestroyed)
        } else {
            Ok(())
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Whether the initial backend read has completed.
    pub fn is_seeded(&self) -> bool {
        self.inner.seeded.get()
    }

    /// Copy of the current state.
    pub fn get_state(&self) -> Result<UiState, LifecycleError> {
        self.ensure_alive()?;
        Ok(self.inner.state.borrow().clone())
    }

    /// Seed from the backend. Best-effort: read failures and absent or
    /// malformed records leave the default inactive state, and a state
    /// already changed locally is never overwritten.
    pub async fn load_initial_state(&self) {
        if self.is_destroyed() {
            return;
        }
        let revision = self.inner.revision.get();
        let result =
            backend::load::<ActivationRecord>(&*self.inner.backend, &self.inner.state_key).await;
        if self.is_destroyed() {
            return;
        }
        self.inner.seeded.set(true);

        match result {
            Ok(Some(record)) => {
                if self.inner.revision.get() != revision {
                    debug!("state changed locally before seeding; keeping local state");
                    return;
                }
                let next = self.inner.state.borrow().reconciled_with(&record);
                self.inner.replace_state(next);
                info!(active = record.is_active, "UI state seeded from backend");
            }
            Ok(None) => debug!("no persisted UI state; starting inactive"),
            Err(e) => {
                warn!(error = %e, "could not seed UI state; starting inactive");
                self.inner.report(&e);
            }
        }
    }

    /// Activate or deactivate the reader view.
    ///
    /// Activation uses the supplied url/title, falling back to the ones
    /// already stored. With neither, the call is rejected: nothing changes
    /// and `Ok(false)` is returned. Deactivation clears url, title and
    /// activation time.
    ///
    /// The new state is applied and announced before the backend write; a
    /// failed write is reported but does not roll the state back.
    pub async fn set_reader_view_active(
        &self,
        is_active: bool,
        url: Option<String>,
        title: Option<String>,
    ) -> Result<bool, LifecycleError> {
        self.ensure_alive()?;

        let previous = self.inner.state.borrow().clone();
        let Some(next) = self.next_activation(&previous, is_active, url, title) else {
            return Ok(false);
        };
        self.inner.replace_state(next.clone());
        self.persist(&next).await;
        Ok(true)
    }

    /// [`set_reader_view_active`](Self::set_reader_view_active) plus the
    /// mount flags, applied as one replacement so subscribers never see a
    /// mounted view that is not active (or the reverse).
    ///
    /// `ui_mounted` follows `is_active`; the shadow flag is only kept while
    /// active. The backend is written when either side of the transition
    /// is active.
    pub async fn set_reader_view_mounted(
        &self,
        is_active: bool,
        url: Option<String>,
        title: Option<String>,
        shadow_dom_attached: bool,
    ) -> Result<bool, LifecycleError> {
        self.ensure_alive()?;

        let previous = self.inner.state.borrow().clone();
        let Some(next) = self.next_activation(&previous, is_active, url, title) else {
            return Ok(false);
        };
        let next = next
            .with_ui_mounted(is_active)
            .with_shadow_dom_attached(is_active && shadow_dom_attached);
        self.inner.replace_state(next.clone());
        if is_active || previous.is_reader_view_active() {
            self.persist(&next).await;
        }
        Ok(true)
    }

    fn next_activation(
        &self,
        previous: &UiState,
        is_active: bool,
        url: Option<String>,
        title: Option<String>,
    ) -> Option<UiState> {
        if !is_active {
            return Some(previous.deactivated());
        }
        let url = url.or_else(|| previous.current_url().map(str::to_string));
        let title = title.or_else(|| previous.current_title().map(str::to_string));
        match (url, title) {
            (Some(url), Some(title)) => {
                Some(previous.activated(url, title, self.inner.manager.host().now()))
            }
            _ => {
                warn!("activation without url/title and none stored; ignoring");
                None
            }
        }
    }

    async fn persist(&self, state: &UiState) {
        let inner = &self.inner;
        inner.pending_writes.set(inner.pending_writes.get() + 1);
        let result = if state.is_reader_view_active() {
            backend::save(&*inner.backend, &inner.state_key, &state.to_record()).await
        } else {
            inner.backend.remove(&inner.state_key).await
        };
        inner.pending_writes.set(inner.pending_writes.get() - 1);

        if let Err(e) = result {
            inner.report(&e);
        }
    }

    pub fn set_ui_mounted(&self, mounted: bool) -> Result<(), LifecycleError> {
        self.ensure_alive()?;
        let next = self.inner.state.borrow().with_ui_mounted(mounted);
        self.inner.replace_state(next);
        Ok(())
    }

    pub fn set_shadow_dom_attached(&self, attached: bool) -> Result<(), LifecycleError> {
        self.ensure_alive()?;
        let next = self.inner.state.borrow().with_shadow_dom_attached(attached);
        self.inner.replace_state(next);
        Ok(())
    }

    /// Subscribe to state replacements. The same `Rc` is only added once.
    pub fn add_state_change_listener(
        &self,
        listener: StateChangeListener,
    ) -> Result<(), LifecycleError> {
        self.ensure_alive()?;
        let mut listeners = self.inner.listeners.borrow_mut();
        if !listeners.iter().any(|existing| Rc::ptr_eq(existing, &listener)) {
            listeners.push(listener);
        }
        Ok(())
    }

    pub fn remove_state_change_listener(
        &self,
        listener: &StateChangeListener,
    ) -> Result<bool, LifecycleError> {
        self.ensure_alive()?;
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|existing| !Rc::ptr_eq(existing, listener));
        Ok(listeners.len() != before)
    }

    pub fn set_error_sink(&self, sink: ErrorSink) -> Result<(), LifecycleError> {
        self.ensure_alive()?;
        *self.inner.error_sink.borrow_mut() = Some(sink);
        Ok(())
    }

    /// Reconcile with the backend every `interval_ms`. Restarting replaces
    /// the previous schedule.
    pub fn start_storage_sync(&self, interval_ms: u32) -> Result<(), LifecycleError> {
        self.ensure_alive()?;
        self.inner.stop_sync();

        let weak = Rc::downgrade(&self.inner);
        let handle = self.inner.manager.register_interval(
            move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let store = UiStateStore { inner };
                let manager = store.inner.manager.clone();
                manager.spawn(async move {
                    if let Err(e) = store.sync_from_storage().await {
                        debug!(error = %e, "storage sync tick after destroy");
                    }
                });
            },
            interval_ms,
        );

        if handle.is_noop() {
            warn!(interval_ms, "storage sync could not be scheduled");
        } else {
            self.inner.sync_timer.set(Some(handle));
            debug!(interval_ms, "storage sync started");
        }
        Ok(())
    }

    pub fn stop_storage_sync(&self) -> Result<(), LifecycleError> {
        self.ensure_alive()?;
        self.inner.stop_sync();
        Ok(())
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.sync_timer.get().is_some()
    }

    /// One reconciliation pass. Returns whether the state was replaced.
    pub async fn sync_from_storage(&self) -> Result<bool, LifecycleError> {
        self.ensure_alive()?;
        let inner = &self.inner;
        if inner.sync_in_flight.get() || inner.pending_writes.get() > 0 {
            return Ok(false);
        }

        inner.sync_in_flight.set(true);
        let revision = inner.revision.get();
        let result = backend::load::<ActivationRecord>(&*inner.backend, &inner.state_key).await;
        inner.sync_in_flight.set(false);

        if inner.destroyed.get() {
            return Ok(false);
        }
        if inner.revision.get() != revision || inner.pending_writes.get() > 0 {
            debug!("local state changed during storage read; discarding read");
            return Ok(false);
        }

        let record = match result {
            Ok(record) => record.unwrap_or_default(),
            Err(e @ BackendError::Malformed { .. }) => {
                inner.report(&e);
                ActivationRecord::default()
            }
            Err(e) => {
                inner.report(&e);
                return Ok(false);
            }
        };

        let next = inner.state.borrow().reconciled_with(&record);
        let changed = inner.replace_state(next);
        if changed {
            info!(active = record.is_active, "UI state reconciled from backend");
        }
        Ok(changed)
    }

    /// Stop syncing, drop subscribers and refuse further use. Idempotent.
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

impl fmt::Debug for UiStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiStateStore")
            .field("state", &*self.inner.state.borrow())
            .field("destroyed", &self.inner.destroyed.get())
            .field("syncing", &self.is_syncing())
            .finish()
    }
}
