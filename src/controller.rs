//! View Activation Controller
//!
//! Activate/deactivate state machine for the reader overlay on one document.
//!
//! ```text
//! Inactive ──toggle──► Extracting ──ok──► Mounting ──► Active
//!                          │                 │
//!                          └─fail─► Inactive ◄┘ (rolled back)
//!
//! Active ──toggle──► Unmounting ──► Restoring ──► Inactive
//! ```
//!
//! Everything up to the state replacement runs without suspending, so a
//! second toggle dispatched while the first awaits its backend write sees
//! the overlay as active. That guard plus roll-back on partial failure is
//! the only concurrency control.

use crate::backend::{self, PersistentStateBackend};
use crate::config::ReaderConfig;
use crate::content::{ContentExtractor, ExtractionResult, ReaderContent};
use crate::document::{remove_stale_containers, PageDocument, PageSnapshot, OVERLAY_CONTAINER_ID};
use crate::error::{ActivationFailure, DomError, LifecycleError, MountError};
use crate::lifecycle::{panic_message, CleanupFn, ResourceLifecycleManager};
use crate::mount::ViewMounter;
use crate::store::UiStateStore;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, error, info, warn};

/// Everything needed to put the page back.
struct ActiveSession<C, H> {
    snapshot: PageSnapshot,
    container: C,
    handle: H,
    cleanup: CleanupFn,
}

struct ControllerInner<D, X, M>
where
    D: PageDocument,
    M: ViewMounter<D::Container>,
{
    manager: ResourceLifecycleManager,
    store: UiStateStore,
    backend: Rc<dyn PersistentStateBackend>,
    extractor: X,
    mounter: M,
    config: ReaderConfig,
    session: RefCell<Option<ActiveSession<D::Container, M::Handle>>>,
    last_failure: RefCell<Option<ActivationFailure>>,
}

impl<D, X, M> ControllerInner<D, X, M>
where
    D: PageDocument,
    M: ViewMounter<D::Container>,
{
    fn unmount_quietly(&self, handle: M::Handle) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.mounter.unmount(handle)))
        {
            error!(panic = %panic_message(payload.as_ref()), "view unmount panicked");
        }
    }

    /// Unmount, drop the container and reveal the page. Falls back to
    /// overwriting from the snapshot only if the markup still differs.
    fn restore_page(
        &self,
        document: &D,
        session: ActiveSession<D::Container, M::Handle>,
    ) -> Result<(), DomError> {
        self.manager.unregister_cleanup(&session.cleanup);
        self.unmount_quietly(session.handle);
        document.remove_container(&session.container);
        if let Err(e) = document.set_page_hidden(false) {
            warn!(error = %e, "could not reveal page content");
        }

        if session.snapshot.matches(document) {
            debug!("page restored in place");
            return Ok(());
        }
        debug!("page markup diverged; restoring from snapshot");
        document.restore(&session.snapshot)
    }
}

/// Owns reader overlay mutation for documents of type `D`.
///
/// Clones share the same controller.
pub struct ReaderViewController<D, X, M>
where
    D: PageDocument,
    M: ViewMounter<D::Container>,
{
    inner: Rc<ControllerInner<D, X, M>>,
}

impl<D, X, M> Clone for ReaderViewController<D, X, M>
where
    D: PageDocument,
    M: ViewMounter<D::Container>,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D, X, M> ReaderViewController<D, X, M>
where
    D: PageDocument + Clone + 'static,
    D::Container: 'static,
    X: ContentExtractor<D> + 'static,
    M: ViewMounter<D::Container> + 'static,
    M::Handle: 'static,
{
    /// Build the controller and its state store. Storage sync starts when
    /// `config.sync_interval_ms` is non-zero.
    pub fn new(
        manager: ResourceLifecycleManager,
        backend: Rc<dyn PersistentStateBackend>,
        extractor: X,
        mounter: M,
        config: ReaderConfig,
    ) -> Self {
        let store = UiStateStore::new(manager.clone(), backend.clone(), config.state_key.clone());
        if config.sync_enabled() {
            if let Err(e) = store.start_storage_sync(config.sync_interval_ms) {
                warn!(error = %e, "storage sync not started");
            }
        }
        debug!(
            sync_interval_ms = config.sync_interval_ms,
            persist_snapshot = config.persist_snapshot,
            "reader view controller created"
        );

        Self {
            inner: Rc::new(ControllerInner {
                manager,
                store,
                backend,
                extractor,
                mounter,
                config,
                session: RefCell::new(None),
                last_failure: RefCell::new(None),
            }),
        }
    }

    pub fn store(&self) -> &UiStateStore {
        &self.inner.store
    }

    pub fn manager(&self) -> &ResourceLifecycleManager {
        &self.inner.manager
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.inner.config
    }

    /// Why the most recent `activate` returned false, if it did.
    pub fn last_failure(&self) -> Option<ActivationFailure> {
        self.inner.last_failure.borrow().clone()
    }

    /// Whether an overlay is mounted by this controller.
    pub fn has_live_session(&self) -> bool {
        self.inner.session.borrow().is_some()
    }

    /// Mounted here, or marked active in the store.
    pub fn is_active(&self) -> bool {
        self.has_live_session()
            || self
                .inner
                .store
                .get_state()
                .map(|state| state.is_reader_view_active())
                .unwrap_or(false)
    }

    /// Deactivate when active, otherwise activate. Returns whether the
    /// overlay is now shown.
    pub async fn toggle(&self, document: &D) -> bool {
        if self.is_active() {
            self.deactivate(document).await;
            false
        } else {
            self.activate(document).await
        }
    }

    /// Mount the reader overlay. Returns true only if extraction, mounting
    /// and the state update all succeeded; otherwise the document is left
    /// as it was and [`last_failure`](Self::last_failure) says why.
    ///
    /// `true` reports that every step succeeded, not that the overlay is
    /// still up: a `deactivate` (or context invalidation) that runs while
    /// this call awaits its backend write removes the overlay first. Check
    /// [`is_active`](Self::is_active) for the current state.
    pub async fn activate(&self, document: &D) -> bool {
        match self.try_activate(document).await {
            Ok(()) => {
                *self.inner.last_failure.borrow_mut() = None;
                true
            }
            Err(failure) => {
                if failure.is_guard() {
                    debug!(reason = %failure, "activation skipped");
                } else {
                    warn!(reason = %failure, "reader view activation failed");
                }
                *self.inner.last_failure.borrow_mut() = Some(failure);
                false
            }
        }
    }

    async fn try_activate(&self, document: &D) -> Result<(), ActivationFailure> {
        let inner = &self.inner;
        if inner.store.get_state()?.is_reader_view_active() {
            return Err(ActivationFailure::AlreadyActive);
        }
        if inner.session.borrow().is_some() {
            return Err(ActivationFailure::SessionLive);
        }
        if !inner.manager.is_valid() {
            return Err(LifecycleError::ContextInvalidated.into());
        }

        let content = match inner.extractor.extract(document) {
            ExtractionResult::Readable(content) => content,
            ExtractionResult::Unreadable(reason) => {
                return Err(ActivationFailure::ExtractionFailed(reason))
            }
        };

        let snapshot = PageSnapshot::capture(document)?;
        let (container, handle, cleanup) = match self.mount_overlay(document, &content) {
            Ok(parts) => parts,
            Err(failure) => {
                self.roll_back(document, &snapshot);
                return Err(failure);
            }
        };
        let shadow_root = document.has_shadow_root(&container);
        *inner.session.borrow_mut() = Some(ActiveSession {
            snapshot: snapshot.clone(),
            container,
            handle,
            cleanup,
        });

        let url = document.location();
        if let Err(e) = self
            .publish_active(url.clone(), content.title.clone(), shadow_root)
            .await
        {
            let session = inner.session.borrow_mut().take();
            if let Some(session) = session {
                if let Err(dom) = inner.restore_page(document, session) {
                    error!(error = %dom, "could not restore page after failed activation");
                }
            }
            return Err(e.into());
        }
        info!(url = %url, title = %content.title, "reader view activated");

        if inner.config.persist_snapshot && self.has_live_session() {
            if let Err(e) = backend::save(&*inner.backend, &inner.config.snapshot_key, &snapshot).await
            {
                warn!(error = %e, "could not persist page snapshot");
            }
        }
        Ok(())
    }

    /// Create the container and mount into it. On failure nothing the
    /// call added is left behind.
    fn mount_overlay(
        &self,
        document: &D,
        content: &ReaderContent,
    ) -> Result<(D::Container, M::Handle, CleanupFn), ActivationFailure> {
        let inner = &self.inner;
        let stale = remove_stale_containers(document);
        if stale > 0 {
            warn!(stale, "removed stale reader overlay containers");
        }

        let container = document.create_container(OVERLAY_CONTAINER_ID)?;
        let cleanup = self.session_cleanup(document);
        if !inner.manager.register_cleanup(cleanup.clone()) {
            document.remove_container(&container);
            return Err(LifecycleError::ContextInvalidated.into());
        }

        match self.hide_and_mount(document, &container, content) {
            Ok(handle) => Ok((container, handle, cleanup)),
            Err(failure) => {
                inner.manager.unregister_cleanup(&cleanup);
                if let Err(e) = document.set_page_hidden(false) {
                    warn!(error = %e, "could not reveal page during roll-back");
                }
                document.remove_container(&container);
                Err(failure)
            }
        }
    }

    fn hide_and_mount(
        &self,
        document: &D,
        container: &D::Container,
        content: &ReaderContent,
    ) -> Result<M::Handle, ActivationFailure> {
        document.set_page_hidden(true)?;
        match panic::catch_unwind(AssertUnwindSafe(|| self.inner.mounter.mount(container, content))) {
            Ok(mounted) => Ok(mounted?),
            Err(payload) => Err(MountError::Render(panic_message(payload.as_ref())).into()),
        }
    }

    fn roll_back(&self, document: &D, snapshot: &PageSnapshot) {
        if snapshot.matches(document) {
            return;
        }
        warn!("document changed during failed activation; restoring snapshot");
        if let Err(e) = document.restore(snapshot) {
            error!(error = %e, "could not restore page after failed activation");
        }
    }

    /// Teardown action for a mounted session: puts the page back when the
    /// context dies with the overlay still up.
    fn session_cleanup(&self, document: &D) -> CleanupFn {
        let weak = Rc::downgrade(&self.inner);
        let document = document.clone();
        Rc::new(move || -> anyhow::Result<()> {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let session = inner.session.borrow_mut().take();
            if let Some(session) = session {
                inner.restore_page(&document, session)?;
                info!("reader overlay removed on context invalidation");
            }
            Ok(())
        })
    }

    async fn publish_active(
        &self,
        url: String,
        title: String,
        shadow_root: bool,
    ) -> Result<(), LifecycleError> {
        self.inner
            .store
            .set_reader_view_mounted(true, Some(url), Some(title), shadow_root)
            .await?;
        Ok(())
    }

    /// Unmount the overlay, restore the page and mark the view inactive.
    /// A no-op when nothing is mounted and the state is already inactive.
    pub async fn deactivate(&self, document: &D) {
        let inner = &self.inner;
        let session = inner.session.borrow_mut().take();
        let had_session = session.is_some();
        if let Some(session) = session {
            if let Err(e) = inner.restore_page(document, session) {
                error!(error = %e, "could not restore page from snapshot");
            }
        }

        let state = match inner.store.get_state() {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "state store unavailable during deactivate");
                return;
            }
        };
        if !had_session
            && !state.is_reader_view_active()
            && !state.ui_mounted()
            && !state.shadow_dom_attached()
        {
            debug!("deactivate while inactive; nothing to do");
            return;
        }

        if let Err(e) = self.publish_inactive().await {
            debug!(error = %e, "state store destroyed during deactivate");
        }
        if had_session && inner.config.persist_snapshot {
            if let Err(e) = inner.backend.remove(&inner.config.snapshot_key).await {
                warn!(error = %e, "could not remove persisted page snapshot");
            }
        }
        info!("reader view deactivated");
    }

    async fn publish_inactive(&self) -> Result<(), LifecycleError> {
        self.inner
            .store
            .set_reader_view_mounted(false, None, None, false)
            .await?;
        Ok(())
    }
}

impl<D, X, M> fmt::Debug for ReaderViewController<D, X, M>
where
    D: PageDocument,
    M: ViewMounter<D::Container>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderViewController")
            .field("live_session", &self.inner.session.borrow().is_some())
            .field("store", &self.inner.store)
            .field("last_failure", &*self.inner.last_failure.borrow())
            .finish()
    }
}
