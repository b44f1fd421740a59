//! Execution-context validity token.
//!
//! The host owns the signal and flips it exactly once, when the content
//! script's context goes away (navigation, extension reload, teardown).
//! Everything else only observes it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Identifies a registered invalidation observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnOnce()>;

struct SignalInner {
    valid: Cell<bool>,
    next_id: Cell<u64>,
    observers: RefCell<Vec<(ObserverId, Observer)>>,
}

/// One-shot valid -> invalid transition with notification.
///
/// Cloning shares the same underlying token.
#[derive(Clone)]
pub struct ValiditySignal {
    inner: Rc<SignalInner>,
}

impl ValiditySignal {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SignalInner {
                valid: Cell::new(true),
                next_id: Cell::new(1),
                observers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.get()
    }

    /// Run `observer` once when the signal goes invalid.
    ///
    /// A signal that is already invalid runs the observer immediately and
    /// returns `None`.
    pub fn on_invalidated(&self, observer: impl FnOnce() + 'static) -> Option<ObserverId> {
        if !self.is_valid() {
            observer();
            return None;
        }
        let id = ObserverId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        self.inner
            .observers
            .borrow_mut()
            .push((id, Box::new(observer)));
        Some(id)
    }

    /// Drop an observer that has not fired yet.
    pub fn remove_observer(&self, id: ObserverId) {
        self.inner
            .observers
            .borrow_mut()
            .retain(|(observer_id, _)| *observer_id != id);
    }

    /// Flip to invalid and notify observers in registration order.
    ///
    /// Returns `false` if the signal was already invalid; observers never
    /// run twice.
    pub fn invalidate(&self) -> bool {
        if !self.inner.valid.replace(false) {
            return false;
        }
        let observers = std::mem::take(&mut *self.inner.observers.borrow_mut());
        tracing::debug!(observers = observers.len(), "execution context invalidated");
        for (_, observer) in observers {
            observer();
        }
        true
    }
}

impl Default for ValiditySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValiditySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValiditySignal")
            .field("valid", &self.is_valid())
            .field("observers", &self.inner.observers.borrow().len())
            .finish()
    }
}
