//! Deterministic host with a virtual clock.
//!
//! Timers only fire from [`ManualHost::advance`], listeners only fire from
//! [`ManualHost::dispatch`], and spawned tasks run on a local executor driven
//! by [`ManualHost::run_until_stalled`] / [`ManualHost::block_on`].

use super::{
    EventListener, HostEnvironment, HostEvent, ListenerKey, ListenerOptions, ListenerTarget,
    TimerId,
};
use crate::error::HostError;
use chrono::{DateTime, Duration, Utc};
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;

/// Fixed start of virtual time (2023-11-14T22:13:20Z).
const DEFAULT_EPOCH_SECS: i64 = 1_700_000_000;

enum TimerCallback {
    Once(Box<dyn FnOnce()>),
    Every(Rc<dyn Fn()>),
}

struct ScheduledTimer {
    due_ms: u64,
    period_ms: Option<u64>,
    callback: TimerCallback,
}

struct AttachedListener {
    target: ListenerTarget,
    event_type: String,
    listener: EventListener,
    options: ListenerOptions,
}

pub struct ManualHost {
    epoch: DateTime<Utc>,
    clock_ms: Cell<u64>,
    next_timer: Cell<TimerId>,
    next_listener: Cell<ListenerKey>,
    timers: RefCell<BTreeMap<TimerId, ScheduledTimer>>,
    listeners: RefCell<BTreeMap<ListenerKey, AttachedListener>>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    refuse_registrations: Cell<bool>,
    registrations: Cell<usize>,
}

impl ManualHost {
    pub fn new() -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(DEFAULT_EPOCH_SECS, 0).unwrap_or_default();
        Self::with_epoch(epoch)
    }

    pub fn with_epoch(epoch: DateTime<Utc>) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            epoch,
            clock_ms: Cell::new(0),
            next_timer: Cell::new(1),
            next_listener: Cell::new(1),
            timers: RefCell::new(BTreeMap::new()),
            listeners: RefCell::new(BTreeMap::new()),
            pool: RefCell::new(pool),
            spawner,
            refuse_registrations: Cell::new(false),
            registrations: Cell::new(0),
        }
    }

    /// Make every subsequent timer/listener registration fail.
    pub fn refuse_registrations(&self, refuse: bool) {
        self.refuse_registrations.set(refuse);
    }

    /// Milliseconds elapsed on the virtual clock.
    pub fn elapsed_ms(&self) -> u64 {
        self.clock_ms.get()
    }

    /// Timers and intervals still scheduled.
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Listeners still attached.
    pub fn attached_listeners(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Successful underlying registrations since creation.
    pub fn registration_count(&self) -> usize {
        self.registrations.get()
    }

    /// Poll spawned tasks until none can make progress.
    ///
    /// A nested call from inside a running task is a no-op; the outer run
    /// picks up the work.
    pub fn run_until_stalled(&self) {
        if let Ok(mut pool) = self.pool.try_borrow_mut() {
            pool.run_until_stalled();
        }
    }

    /// Drive `future` (and any spawned tasks) to completion.
    ///
    /// Must not be called from inside a spawned task.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.pool.borrow_mut().run_until(future)
    }

    /// Move the virtual clock forward, firing due timers in order.
    pub fn advance(&self, ms: u64) {
        let target = self.clock_ms.get() + ms;
        while let Some(fire) = self.take_next_due(target) {
            fire();
            self.run_until_stalled();
        }
        self.clock_ms.set(target);
        self.run_until_stalled();
    }

    fn take_next_due(&self, target: u64) -> Option<Box<dyn FnOnce()>> {
        let mut timers = self.timers.borrow_mut();
        let id = timers
            .iter()
            .filter(|(_, timer)| timer.due_ms <= target)
            .min_by_key(|(id, timer)| (timer.due_ms, **id))
            .map(|(id, _)| *id)?;
        let timer = timers.remove(&id)?;
        self.clock_ms.set(timer.due_ms.max(self.clock_ms.get()));

        match timer.callback {
            TimerCallback::Once(callback) => Some(callback),
            TimerCallback::Every(callback) => {
                let period = timer.period_ms.unwrap_or(1).max(1);
                timers.insert(
                    id,
                    ScheduledTimer {
                        due_ms: timer.due_ms + period,
                        period_ms: Some(period),
                        callback: TimerCallback::Every(callback.clone()),
                    },
                );
                Some(Box::new(move || callback()))
            }
        }
    }

    /// Deliver `event` to every matching listener. Returns how many ran.
    pub fn dispatch(&self, target: &ListenerTarget, event: &HostEvent) -> usize {
        let matching: Vec<EventListener> = {
            let mut listeners = self.listeners.borrow_mut();
            let keys: Vec<ListenerKey> = listeners
                .iter()
                .filter(|(_, attached)| {
                    attached.target == *target && attached.event_type == event.event_type
                })
                .map(|(key, _)| *key)
                .collect();

            let mut matching = Vec::with_capacity(keys.len());
            for key in keys {
                let once = listeners
                    .get(&key)
                    .map(|attached| attached.options.once)
                    .unwrap_or(false);
                let listener = if once {
                    listeners.remove(&key).map(|attached| attached.listener)
                } else {
                    listeners.get(&key).map(|attached| attached.listener.clone())
                };
                matching.extend(listener);
            }
            matching
        };

        for listener in &matching {
            listener(event);
        }
        self.run_until_stalled();
        matching.len()
    }

    fn register_timer(&self, delay_ms: u32, timer: TimerCallback, repeat: bool) -> TimerId {
        let id = self.next_timer.get();
        self.next_timer.set(id + 1);
        let period = u64::from(delay_ms);
        self.timers.borrow_mut().insert(
            id,
            ScheduledTimer {
                due_ms: self.clock_ms.get() + period.max(u64::from(repeat)),
                period_ms: repeat.then_some(period),
                callback: timer,
            },
        );
        self.registrations.set(self.registrations.get() + 1);
        id
    }
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostEnvironment for ManualHost {
    fn set_timeout(
        &self,
        callback: Box<dyn FnOnce()>,
        delay_ms: u32,
    ) -> Result<TimerId, HostError> {
        if self.refuse_registrations.get() {
            return Err(HostError::Timer("registration refused".into()));
        }
        Ok(self.register_timer(delay_ms, TimerCallback::Once(callback), false))
    }

    fn clear_timeout(&self, id: TimerId) {
        self.timers.borrow_mut().remove(&id);
    }

    fn set_interval(
        &self,
        callback: Rc<dyn Fn()>,
        interval_ms: u32,
    ) -> Result<TimerId, HostError> {
        if self.refuse_registrations.get() {
            return Err(HostError::Timer("registration refused".into()));
        }
        Ok(self.register_timer(interval_ms, TimerCallback::Every(callback), true))
    }

    fn clear_interval(&self, id: TimerId) {
        self.timers.borrow_mut().remove(&id);
    }

    fn add_event_listener(
        &self,
        target: &ListenerTarget,
        event_type: &str,
        listener: EventListener,
        options: ListenerOptions,
    ) -> Result<ListenerKey, HostError> {
        if self.refuse_registrations.get() {
            return Err(HostError::Listener("registration refused".into()));
        }
        let key = self.next_listener.get();
        self.next_listener.set(key + 1);
        self.listeners.borrow_mut().insert(
            key,
            AttachedListener {
                target: target.clone(),
                event_type: event_type.to_string(),
                listener,
                options,
            },
        );
        self.registrations.set(self.registrations.get() + 1);
        Ok(key)
    }

    fn remove_event_listener(&self, key: ListenerKey) {
        self.listeners.borrow_mut().remove(&key);
    }

    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(e) = self.spawner.spawn_local(task) {
            tracing::error!(error = %e, "failed to spawn task on manual host");
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = i64::try_from(self.clock_ms.get()).unwrap_or(i64::MAX);
        self.epoch + Duration::milliseconds(elapsed)
    }
}
