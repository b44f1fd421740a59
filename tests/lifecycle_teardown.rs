//! Integration Test: context invalidation and teardown
//!
//! - a cleanup registered many times runs exactly once
//! - registrations after invalidation touch nothing on the host
//! - one failing or panicking cleanup never stops the others
//! - invalidation with the overlay up puts the page back

mod helpers;

use helpers::{harness, long_article_page};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use reader_overlay::host::{HostEvent, ListenerOptions};
use reader_overlay::{
    CleanupFn, ListenerTarget, ManualHost, PageDocument, ResourceLifecycleManager,
    ValiditySignal, OVERLAY_CONTAINER_ID,
};
use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;
use std::task::Context;

fn setup() -> (ValiditySignal, Rc<ManualHost>, ResourceLifecycleManager) {
    let signal = ValiditySignal::new();
    let host = Rc::new(ManualHost::new());
    let manager = ResourceLifecycleManager::new(signal.clone(), host.clone());
    (signal, host, manager)
}

#[derive(Debug, Clone, Copy)]
enum Registration {
    Listener,
    Timer(u32),
    Interval(u32),
    Cleanup,
    Spawn,
}

fn registration_strategy() -> impl Strategy<Value = Registration> {
    prop_oneof![
        Just(Registration::Listener),
        (0u32..5000).prop_map(Registration::Timer),
        (1u32..5000).prop_map(Registration::Interval),
        Just(Registration::Cleanup),
        Just(Registration::Spawn),
    ]
}

proptest! {
    #[test]
    fn prop_same_cleanup_runs_once(repeats in 1usize..64, others in 0usize..8) {
        let (signal, _host, manager) = setup();
        let calls = Rc::new(Cell::new(0usize));
        let c = calls.clone();
        let cleanup: CleanupFn = Rc::new(move || -> anyhow::Result<()> {
            c.set(c.get() + 1);
            Ok(())
        });

        for _ in 0..repeats {
            prop_assert!(manager.register_cleanup(cleanup.clone()));
        }
        for _ in 0..others {
            manager.register_cleanup(Rc::new(|| -> anyhow::Result<()> { Ok(()) }));
        }

        signal.invalidate();
        signal.invalidate();
        prop_assert_eq!(calls.get(), 1);
    }

    #[test]
    fn prop_no_registration_after_invalidation(
        registrations in prop::collection::vec(registration_strategy(), 0..40)
    ) {
        let (signal, host, manager) = setup();
        signal.invalidate();
        let before = host.registration_count();
        let ran = Rc::new(Cell::new(false));

        for registration in registrations {
            match registration {
                Registration::Listener => {
                    let handle = manager.register_listener(
                        ListenerTarget::Document,
                        "keydown",
                        Rc::new(|_: &HostEvent| {}),
                        ListenerOptions::default(),
                    );
                    prop_assert!(handle.is_noop());
                }
                Registration::Timer(ms) => {
                    let r = ran.clone();
                    let handle = manager.register_timer(move || r.set(true), ms);
                    prop_assert!(handle.is_noop());
                    prop_assert!(handle.id() < 0);
                }
                Registration::Interval(ms) => {
                    let r = ran.clone();
                    prop_assert!(manager.register_interval(move || r.set(true), ms).is_noop());
                }
                Registration::Cleanup => {
                    let accepted = manager.register_cleanup(Rc::new(|| -> anyhow::Result<()> { Ok(()) }));
                    prop_assert!(!accepted);
                }
                Registration::Spawn => {
                    let r = ran.clone();
                    let accepted = manager.spawn(async move { r.set(true) });
                    prop_assert!(!accepted);
                }
            }
        }

        host.advance(10_000);
        prop_assert_eq!(host.registration_count(), before);
        prop_assert_eq!(host.pending_timers(), 0);
        prop_assert_eq!(host.attached_listeners(), 0);
        prop_assert_eq!(manager.resource_count(), 0);
        prop_assert!(!ran.get());
    }
}

#[test]
fn test_thousand_cleanups_with_one_failing() {
    let (signal, _host, manager) = setup();
    let calls = Rc::new(Cell::new(0usize));

    for i in 0..1000 {
        let c = calls.clone();
        manager.register_cleanup(Rc::new(move || -> anyhow::Result<()> {
            c.set(c.get() + 1);
            if i == 417 {
                anyhow::bail!("cleanup {i} failed");
            }
            Ok(())
        }));
    }

    assert!(signal.invalidate());
    assert_eq!(calls.get(), 1000);
    assert!(!manager.is_valid());
}

#[test]
fn test_thousand_cleanups_with_one_panicking() {
    let (signal, _host, manager) = setup();
    let calls = Rc::new(Cell::new(0usize));

    for i in 0..1000 {
        let c = calls.clone();
        manager.register_cleanup(Rc::new(move || -> anyhow::Result<()> {
            c.set(c.get() + 1);
            if i == 999 {
                panic!("cleanup {i} exploded");
            }
            Ok(())
        }));
    }

    signal.invalidate();
    assert_eq!(calls.get(), 1000);
}

#[test]
fn test_teardown_releases_host_resources() {
    let (signal, host, manager) = setup();
    let fired = Rc::new(Cell::new(0));

    let f = fired.clone();
    manager.register_timer(move || f.set(f.get() + 1), 100);
    let f = fired.clone();
    manager.register_interval(move || f.set(f.get() + 1), 10);
    manager.register_listener(
        ListenerTarget::Window,
        "resize",
        Rc::new(|_: &HostEvent| {}),
        ListenerOptions::default(),
    );
    assert_eq!(host.pending_timers(), 2);
    assert_eq!(host.attached_listeners(), 1);

    signal.invalidate();
    host.advance(1_000);
    assert_eq!(fired.get(), 0);
    assert_eq!(host.pending_timers(), 0);
    assert_eq!(host.attached_listeners(), 0);
}

#[test]
fn test_invalidation_with_overlay_up_restores_page() {
    let h = harness();
    let doc = long_article_page();
    let before = doc.html();
    assert!(h.host.block_on(h.controller.activate(&doc)));
    assert!(doc.is_page_hidden());

    h.signal.invalidate();

    assert_eq!(doc.html(), before);
    assert_eq!(doc.count_elements_by_id(OVERLAY_CONTAINER_ID), 0);
    assert_eq!(h.mounter.unmounts(), 1);
    assert!(h.controller.store().is_destroyed());
    assert!(h.controller.store().get_state().is_err());
    assert_eq!(h.manager.resource_count(), 0);
}

#[test]
fn test_operations_after_invalidation_do_not_panic() {
    let h = harness();
    let doc = long_article_page();
    let before = doc.html();
    h.signal.invalidate();

    assert!(!h.host.block_on(h.controller.toggle(&doc)));
    h.host.block_on(h.controller.deactivate(&doc));
    assert_eq!(doc.html(), before);
}

#[test]
fn test_write_in_flight_at_invalidation_completes_inertly() {
    let h = harness();
    h.backend.yield_on_io(true);
    let doc = long_article_page();
    let before = doc.html();

    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut activation = Box::pin(h.controller.activate(&doc));

    // Suspended on the backend write with the overlay mounted.
    assert!(activation.as_mut().poll(&mut cx).is_pending());
    assert!(doc.is_page_hidden());

    h.signal.invalidate();
    assert_eq!(doc.html(), before);

    while activation.as_mut().poll(&mut cx).is_pending() {}
    assert_eq!(doc.html(), before);
    assert!(!h.controller.has_live_session());
    assert_eq!(h.host.pending_timers(), 0);
}
