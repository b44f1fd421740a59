//! Integration Test: UI state store reconciliation
//!
//! Periodic sync against the persistent backend on the virtual clock:
//! - external changes are picked up on the next poll and announced once
//! - unchanged backend values never notify
//! - reads never clobber local changes made while they were suspended
//! - backend failures are reported, never thrown

mod helpers;

use helpers::{harness_with, long_article_page, quiet_config};
use pretty_assertions::assert_eq;
use reader_overlay::error::BackendError;
use reader_overlay::{
    InMemoryBackend, ManualHost, ReaderConfig, ResourceLifecycleManager, UiState, UiStateStore,
    ValiditySignal,
};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll};

const KEY: &str = "readerViewState";

struct Fixture {
    signal: ValiditySignal,
    host: Rc<ManualHost>,
    backend: InMemoryBackend,
    store: UiStateStore,
}

fn fixture() -> Fixture {
    let signal = ValiditySignal::new();
    let host = Rc::new(ManualHost::new());
    let manager = ResourceLifecycleManager::new(signal.clone(), host.clone());
    let backend = InMemoryBackend::new();
    let store = UiStateStore::new(manager, Rc::new(backend.clone()), KEY);
    host.run_until_stalled();
    Fixture {
        signal,
        host,
        backend,
        store,
    }
}

fn active_record(url: &str, title: &str) -> serde_json::Value {
    json!({
        "isActive": true,
        "url": url,
        "title": title,
        "lastActivated": "2024-05-01T12:00:00Z",
    })
}

fn record_notifications(store: &UiStateStore) -> Rc<RefCell<Vec<UiState>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    store
        .add_state_change_listener(Rc::new(move |next: &UiState, _: &UiState| {
            s.borrow_mut().push(next.clone())
        }))
        .unwrap();
    seen
}

fn poll_once<F: Future>(future: std::pin::Pin<&mut F>) -> Poll<F::Output> {
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    future.poll(&mut cx)
}

#[test]
fn test_sync_at_50ms_notifies_only_on_change() {
    let f = fixture();
    let seen = record_notifications(&f.store);
    f.store.start_storage_sync(50).unwrap();

    f.host.advance(50);
    f.host.advance(50);
    assert!(seen.borrow().is_empty());

    f.backend.insert(KEY, active_record("https://news.test/a", "A"));
    f.host.advance(50);
    assert_eq!(seen.borrow().len(), 1);
    let state = seen.borrow()[0].clone();
    assert!(state.is_reader_view_active());
    assert_eq!(state.current_title(), Some("A"));
    assert_eq!(f.store.get_state().unwrap(), state);

    f.host.advance(500);
    assert_eq!(seen.borrow().len(), 1);

    f.backend.insert(KEY, json!({"isActive": false}));
    f.host.advance(50);
    assert_eq!(seen.borrow().len(), 2);
    assert!(!seen.borrow()[1].is_reader_view_active());
}

#[test]
fn test_sync_polls_on_schedule() {
    let f = fixture();
    let reads = f.backend.read_count();
    f.store.start_storage_sync(50).unwrap();
    f.host.advance(49);
    assert_eq!(f.backend.read_count(), reads);
    f.host.advance(1);
    assert_eq!(f.backend.read_count(), reads + 1);
    f.host.advance(200);
    assert_eq!(f.backend.read_count(), reads + 5);
}

#[test]
fn test_restart_replaces_schedule() {
    let f = fixture();
    f.store.start_storage_sync(50).unwrap();
    f.store.start_storage_sync(100).unwrap();
    assert_eq!(f.host.pending_timers(), 1);

    let reads = f.backend.read_count();
    f.host.advance(100);
    assert_eq!(f.backend.read_count(), reads + 1);
}

#[test]
fn test_read_discarded_when_local_state_changes_meanwhile() {
    let f = fixture();
    f.backend.yield_on_io(true);
    f.backend.insert(KEY, active_record("https://news.test/b", "B"));

    let mut sync = Box::pin(f.store.sync_from_storage());
    assert!(poll_once(sync.as_mut()).is_pending());

    f.store.set_ui_mounted(true).unwrap();

    let Poll::Ready(result) = poll_once(sync.as_mut()) else {
        panic!("sync should finish after one yield");
    };
    assert_eq!(result, Ok(false));
    let state = f.store.get_state().unwrap();
    assert!(!state.is_reader_view_active());
    assert!(state.ui_mounted());
}

#[test]
fn test_sync_skipped_while_write_pending() {
    let f = fixture();
    f.backend.yield_on_io(true);

    let mut write = Box::pin(f.store.set_reader_view_active(
        true,
        Some("https://news.test/c".into()),
        Some("C".into()),
    ));
    assert!(poll_once(write.as_mut()).is_pending());
    assert!(f.store.get_state().unwrap().is_reader_view_active());

    let reads = f.backend.read_count();
    assert_eq!(f.host.block_on(f.store.sync_from_storage()), Ok(false));
    assert_eq!(f.backend.read_count(), reads);
    assert!(f.store.get_state().unwrap().is_reader_view_active());

    assert!(matches!(poll_once(write.as_mut()), Poll::Ready(Ok(true))));
    assert_eq!(f.backend.value(KEY).unwrap()["title"], json!("C"));
}

#[test]
fn test_seed_yields_to_local_change() {
    let signal = ValiditySignal::new();
    let host = Rc::new(ManualHost::new());
    let manager = ResourceLifecycleManager::new(signal, host.clone());
    let backend = InMemoryBackend::new();
    backend.insert(KEY, active_record("https://news.test/d", "D"));
    backend.yield_on_io(true);
    let store = UiStateStore::new(manager, Rc::new(backend), KEY);

    let mut seed = Box::pin(store.load_initial_state());
    assert!(poll_once(seed.as_mut()).is_pending());
    store.set_shadow_dom_attached(true).unwrap();
    assert!(poll_once(seed.as_mut()).is_ready());

    assert!(store.is_seeded());
    let state = store.get_state().unwrap();
    assert!(!state.is_reader_view_active());
    assert!(state.shadow_dom_attached());
}

#[test]
fn test_malformed_record_reads_as_inactive_and_is_reported() {
    let f = fixture();
    let reported = Rc::new(RefCell::new(Vec::new()));
    let r = reported.clone();
    f.store
        .set_error_sink(Rc::new(move |e: &BackendError| r.borrow_mut().push(e.clone())))
        .unwrap();

    f.host
        .block_on(f.store.set_reader_view_active(true, Some("u".into()), Some("t".into())))
        .unwrap();
    f.backend.insert(KEY, json!(["not", "a", "record"]));

    assert_eq!(f.host.block_on(f.store.sync_from_storage()), Ok(true));
    assert!(!f.store.get_state().unwrap().is_reader_view_active());
    assert!(matches!(reported.borrow()[0], BackendError::Malformed { .. }));
}

#[test]
fn test_read_failure_keeps_state() {
    let f = fixture();
    let errors = Rc::new(Cell::new(0));
    let e = errors.clone();
    f.store
        .set_error_sink(Rc::new(move |_: &BackendError| e.set(e.get() + 1)))
        .unwrap();
    f.host
        .block_on(f.store.set_reader_view_active(true, Some("u".into()), Some("t".into())))
        .unwrap();

    f.backend.fail_reads(true);
    f.store.start_storage_sync(50).unwrap();
    f.host.advance(150);

    assert!(f.store.get_state().unwrap().is_reader_view_active());
    assert_eq!(errors.get(), 3);
}

#[test]
fn test_invalidation_stops_sync() {
    let f = fixture();
    let seen = record_notifications(&f.store);
    f.store.start_storage_sync(50).unwrap();

    f.signal.invalidate();
    f.backend.insert(KEY, active_record("u", "t"));
    let reads = f.backend.read_count();
    f.host.advance(500);

    assert_eq!(f.backend.read_count(), reads);
    assert!(seen.borrow().is_empty());
    assert!(f.store.stop_storage_sync().is_err());
    f.store.destroy();
}

#[test]
fn test_controller_config_starts_sync() {
    let config = ReaderConfig {
        sync_interval_ms: 50,
        ..quiet_config()
    };
    let h = harness_with(config, InMemoryBackend::new());
    assert!(h.controller.store().is_syncing());

    h.backend.insert(KEY, active_record("https://elsewhere.test/", "Elsewhere"));
    h.host.advance(50);
    assert!(h.controller.is_active());

    // A record mirrored from elsewhere has no overlay here; toggling clears it.
    let doc = long_article_page();
    assert!(!h.host.block_on(h.controller.toggle(&doc)));
    assert!(!h.controller.store().get_state().unwrap().is_reader_view_active());
    assert!(!h.backend.contains(KEY));
}
