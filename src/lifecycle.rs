//! Resource Lifecycle Manager
//!
//! Every side effect the overlay installs (listener, timer, interval,
//! arbitrary cleanup) is registered here and bound to the context's
//! [`ValiditySignal`]. When the signal goes invalid, everything is reversed
//! exactly once, in registration order.
//!
//! ```text
//! register_*() ──valid?──► HostEnvironment ──► ResourceHandle pushed
//!      │
//!      └─invalid─► no-op (sentinel handle)
//!
//! ValiditySignal ──invalidated──► teardown ──► reverse every handle
//! ```

use crate::host::{
    EventListener, HostEnvironment, ListenerKey, ListenerOptions, ListenerTarget, TimerId,
};
use crate::validity::ValiditySignal;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, warn};

/// Teardown action. Identity (the `Rc` allocation) is what deduplicates.
pub type CleanupFn = Rc<dyn Fn() -> anyhow::Result<()>>;

/// Handle to a registered timer or interval.
///
/// Registrations refused because the context is gone return
/// [`TimerHandle::NOOP`], which carries a negative id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(i32);

impl TimerHandle {
    pub const NOOP: TimerHandle = TimerHandle(-1);

    pub fn id(self) -> i32 {
        self.0
    }

    pub fn is_noop(self) -> bool {
        self.0 < 0
    }
}

/// Handle to a registered event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(Option<ListenerKey>);

impl ListenerHandle {
    pub const NOOP: ListenerHandle = ListenerHandle(None);

    pub fn is_noop(self) -> bool {
        self.0.is_none()
    }
}

/// A registered side effect and what it takes to reverse it.
pub enum ResourceHandle {
    EventListener {
        target: ListenerTarget,
        event_type: String,
        key: ListenerKey,
    },
    Timer(TimerId),
    Interval(TimerId),
    Cleanup(CleanupFn),
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceHandle::EventListener {
                target,
                event_type,
                key,
            } => f
                .debug_struct("EventListener")
                .field("target", target)
                .field("event_type", event_type)
                .field("key", key)
                .finish(),
            ResourceHandle::Timer(id) => f.debug_tuple("Timer").field(id).finish(),
            ResourceHandle::Interval(id) => f.debug_tuple("Interval").field(id).finish(),
            ResourceHandle::Cleanup(_) => f.write_str("Cleanup(..)"),
        }
    }
}

struct ManagerInner {
    host: Rc<dyn HostEnvironment>,
    signal: ValiditySignal,
    torn_down: Cell<bool>,
    resources: RefCell<Vec<ResourceHandle>>,
}

impl ManagerInner {
    fn is_valid(&self) -> bool {
        !self.torn_down.get() && self.signal.is_valid()
    }

    fn forget_timer(&self, id: TimerId) {
        self.resources
            .borrow_mut()
            .retain(|resource| !matches!(resource, ResourceHandle::Timer(t) if *t == id));
    }

    fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }

        let resources = std::mem::take(&mut *self.resources.borrow_mut());
        let total = resources.len();
        let mut failures = 0usize;

        for resource in resources {
            match resource {
                ResourceHandle::EventListener { key, .. } => self.host.remove_event_listener(key),
                ResourceHandle::Timer(id) => self.host.clear_timeout(id),
                ResourceHandle::Interval(id) => self.host.clear_interval(id),
                ResourceHandle::Cleanup(callback) => {
                    if !run_cleanup(&callback) {
                        failures += 1;
                    }
                }
            }
        }

        // Cleanups cannot re-register; the registry stays empty.
        self.resources.borrow_mut().clear();
        info!(resources = total, failures, "execution context torn down");
    }
}

fn run_cleanup(callback: &CleanupFn) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| callback())) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(error = %e, "cleanup callback failed");
            false
        }
        Err(payload) => {
            error!(panic = %panic_message(payload.as_ref()), "cleanup callback panicked");
            false
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Owner of every side effect in one execution context.
///
/// One instance per context, passed explicitly to whatever needs it. Clones
/// share the same registry.
#[derive(Clone)]
pub struct ResourceLifecycleManager {
    inner: Rc<ManagerInner>,
}

impl ResourceLifecycleManager {
    pub fn new(signal: ValiditySignal, host: Rc<dyn HostEnvironment>) -> Self {
        let inner = Rc::new(ManagerInner {
            host,
            signal: signal.clone(),
            torn_down: Cell::new(false),
            resources: RefCell::new(Vec::new()),
        });

        let weak: Weak<ManagerInner> = Rc::downgrade(&inner);
        signal.on_invalidated(move || {
            if let Some(inner) = weak.upgrade() {
                inner.teardown();
            }
        });

        Self { inner }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    pub fn signal(&self) -> &ValiditySignal {
        &self.inner.signal
    }

    pub fn host(&self) -> Rc<dyn HostEnvironment> {
        self.inner.host.clone()
    }

    /// Live registrations, for inspection.
    pub fn resource_count(&self) -> usize {
        self.inner.resources.borrow().len()
    }

    /// Attach `listener` to `target`. No-op once the context is invalid.
    pub fn register_listener(
        &self,
        target: ListenerTarget,
        event_type: &str,
        listener: EventListener,
        options: ListenerOptions,
    ) -> ListenerHandle {
        if !self.is_valid() {
            debug!(event_type, "listener registration after invalidation ignored");
            return ListenerHandle::NOOP;
        }

        match self
            .inner
            .host
            .add_event_listener(&target, event_type, listener, options)
        {
            Ok(key) => {
                self.inner
                    .resources
                    .borrow_mut()
                    .push(ResourceHandle::EventListener {
                        target,
                        event_type: event_type.to_string(),
                        key,
                    });
                ListenerHandle(Some(key))
            }
            Err(e) => {
                warn!(event_type, error = %e, "host refused listener registration");
                ListenerHandle::NOOP
            }
        }
    }

    /// Detach a listener before teardown.
    pub fn remove_listener(&self, handle: ListenerHandle) {
        let Some(key) = handle.0 else {
            return;
        };
        let removed = {
            let mut resources = self.inner.resources.borrow_mut();
            let before = resources.len();
            resources.retain(
                |resource| !matches!(resource, ResourceHandle::EventListener { key: k, .. } if *k == key),
            );
            resources.len() != before
        };
        if removed {
            self.inner.host.remove_event_listener(key);
        }
    }

    /// Run `callback` once after `delay_ms`. Returns [`TimerHandle::NOOP`]
    /// once the context is invalid.
    pub fn register_timer(&self, callback: impl FnOnce() + 'static, delay_ms: u32) -> TimerHandle {
        if !self.is_valid() {
            debug!(delay_ms, "timer registration after invalidation ignored");
            return TimerHandle::NOOP;
        }

        let weak = Rc::downgrade(&self.inner);
        let assigned = Rc::new(Cell::new(TimerHandle::NOOP.0));
        let slot = assigned.clone();
        let wrapped = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.forget_timer(slot.get());
            }
            callback();
        });

        match self.inner.host.set_timeout(wrapped, delay_ms) {
            Ok(id) => {
                assigned.set(id);
                self.inner
                    .resources
                    .borrow_mut()
                    .push(ResourceHandle::Timer(id));
                TimerHandle(id)
            }
            Err(e) => {
                warn!(delay_ms, error = %e, "host refused timer registration");
                TimerHandle::NOOP
            }
        }
    }

    /// Run `callback` every `interval_ms` until cleared or torn down.
    pub fn register_interval(&self, callback: impl Fn() + 'static, interval_ms: u32) -> TimerHandle {
        if !self.is_valid() {
            debug!(interval_ms, "interval registration after invalidation ignored");
            return TimerHandle::NOOP;
        }

        match self.inner.host.set_interval(Rc::new(callback), interval_ms) {
            Ok(id) => {
                self.inner
                    .resources
                    .borrow_mut()
                    .push(ResourceHandle::Interval(id));
                TimerHandle(id)
            }
            Err(e) => {
                warn!(interval_ms, error = %e, "host refused interval registration");
                TimerHandle::NOOP
            }
        }
    }

    pub fn clear_timer(&self, handle: TimerHandle) {
        if handle.is_noop() {
            return;
        }
        self.inner.forget_timer(handle.0);
        self.inner.host.clear_timeout(handle.0);
    }

    pub fn clear_interval(&self, handle: TimerHandle) {
        if handle.is_noop() {
            return;
        }
        self.inner
            .resources
            .borrow_mut()
            .retain(|resource| !matches!(resource, ResourceHandle::Interval(id) if *id == handle.0));
        self.inner.host.clear_interval(handle.0);
    }

    /// Add a teardown action. Registering the same `Rc` twice keeps one
    /// entry. Returns `false` once the context is invalid.
    pub fn register_cleanup(&self, callback: CleanupFn) -> bool {
        if !self.is_valid() {
            debug!("cleanup registration after invalidation ignored");
            return false;
        }

        let mut resources = self.inner.resources.borrow_mut();
        let already = resources.iter().any(
            |resource| matches!(resource, ResourceHandle::Cleanup(existing) if Rc::ptr_eq(existing, &callback)),
        );
        if !already {
            resources.push(ResourceHandle::Cleanup(callback));
        }
        true
    }

    /// Remove a cleanup that has not fired yet. Returns whether it was found.
    pub fn unregister_cleanup(&self, callback: &CleanupFn) -> bool {
        let mut resources = self.inner.resources.borrow_mut();
        let before = resources.len();
        resources.retain(
            |resource| !matches!(resource, ResourceHandle::Cleanup(existing) if Rc::ptr_eq(existing, callback)),
        );
        resources.len() != before
    }

    /// Spawn a task on the host while the context is still valid.
    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) -> bool {
        if !self.is_valid() {
            debug!("task spawn after invalidation ignored");
            return false;
        }
        self.inner.host.spawn_local(Box::pin(task));
        true
    }
}

impl fmt::Debug for ResourceLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLifecycleManager")
            .field("valid", &self.is_valid())
            .field("resources", &self.resource_count())
            .finish()
    }
}
