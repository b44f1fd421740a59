//! Integration Test: reader view activation and restoration
//!
//! Drives the controller against in-memory documents:
//! - activation only happens for readable content
//! - every failed activation leaves the page byte-for-byte intact
//! - deactivation restores the page exactly and is idempotent
//! - overlapping toggles never produce two overlay containers

mod helpers;

use futures::future::join_all;
use helpers::{harness, long_article_page, short_article_page, MountMode, LONG_ARTICLE_TITLE};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use reader_overlay::{
    ActivationFailure, MemoryDocument, PageDocument, UiState, OVERLAY_CONTAINER_ID,
};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn test_short_article_is_not_activated() {
    let h = harness();
    let doc = short_article_page();
    let before = doc.html();

    assert!(!h.host.block_on(h.controller.activate(&doc)));
    assert!(!h.controller.store().get_state().unwrap().is_reader_view_active());
    assert_eq!(doc.html(), before);
    assert!(matches!(
        h.controller.last_failure(),
        Some(ActivationFailure::ExtractionFailed(_))
    ));
    assert_eq!(h.mounter.mounts(), 0);
}

#[test]
fn test_long_article_round_trip() {
    let h = harness();
    let doc = long_article_page();
    let before = doc.html();

    assert!(h.host.block_on(h.controller.activate(&doc)));
    let state = h.controller.store().get_state().unwrap();
    assert!(state.is_reader_view_active());
    assert_eq!(state.current_title(), Some(LONG_ARTICLE_TITLE));
    assert_eq!(state.current_url(), Some("https://blog.test/slow-reading"));
    assert_eq!(doc.count_elements_by_id(OVERLAY_CONTAINER_ID), 1);

    h.host.block_on(h.controller.deactivate(&doc));
    assert_eq!(h.controller.store().get_state().unwrap(), UiState::inactive());
    assert_eq!(doc.count_elements_by_id(OVERLAY_CONTAINER_ID), 0);
    assert_eq!(doc.html(), before);
    assert_eq!(h.mounter.unmounts(), 1);
}

#[test]
fn test_toggle_alternates() {
    let h = harness();
    let doc = long_article_page();
    assert!(h.host.block_on(h.controller.toggle(&doc)));
    assert!(!h.host.block_on(h.controller.toggle(&doc)));
    assert!(h.host.block_on(h.controller.toggle(&doc)));
    assert!(h.controller.is_active());
}

#[test]
fn test_deactivate_when_inactive_is_noop() {
    let h = harness();
    let doc = long_article_page();
    let before = doc.html();
    let notified = Rc::new(RefCell::new(0));
    let n = notified.clone();
    h.controller
        .store()
        .add_state_change_listener(Rc::new(move |_: &UiState, _: &UiState| {
            *n.borrow_mut() += 1
        }))
        .unwrap();

    h.host.block_on(h.controller.deactivate(&doc));
    h.host.block_on(h.controller.deactivate(&doc));

    assert_eq!(doc.html(), before);
    assert_eq!(*notified.borrow(), 0);
    assert_eq!(h.backend.write_count(), 0);
}

#[test]
fn test_each_transition_notifies_once() {
    let h = harness();
    let doc = long_article_page();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    h.controller
        .store()
        .add_state_change_listener(Rc::new(move |next: &UiState, _: &UiState| {
            s.borrow_mut().push((next.is_reader_view_active(), next.ui_mounted()))
        }))
        .unwrap();

    assert!(h.host.block_on(h.controller.activate(&doc)));
    assert_eq!(*seen.borrow(), vec![(true, true)]);

    h.host.block_on(h.controller.deactivate(&doc));
    assert_eq!(*seen.borrow(), vec![(true, true), (false, false)]);
}

#[test]
fn test_mount_failure_rolls_back_page() {
    let h = harness();
    let doc = long_article_page();
    let before = doc.html();
    h.mounter.set_mode(MountMode::Fail);

    assert!(!h.host.block_on(h.controller.activate(&doc)));
    assert_eq!(doc.html(), before);
    assert!(!doc.is_page_hidden());
    assert!(!h.controller.has_live_session());
    assert!(matches!(h.controller.last_failure(), Some(ActivationFailure::Mount(_))));
    assert_eq!(h.controller.store().get_state().unwrap(), UiState::inactive());
}

#[test]
fn test_mount_panic_is_contained() {
    let h = harness();
    let doc = long_article_page();
    let before = doc.html();
    h.mounter.set_mode(MountMode::Panic);

    assert!(!h.host.block_on(h.controller.activate(&doc)));
    assert_eq!(doc.html(), before);

    h.mounter.set_mode(MountMode::Render);
    assert!(h.host.block_on(h.controller.activate(&doc)));
}

#[test]
fn test_missing_dom_capability_is_a_safe_no_op() {
    let h = harness();
    let doc = long_article_page();
    let before = doc.html();
    doc.fail_container_creation(true);

    assert!(!h.host.block_on(h.controller.toggle(&doc)));
    assert_eq!(doc.html(), before);
    assert!(matches!(h.controller.last_failure(), Some(ActivationFailure::Dom(_))));
}

#[test]
fn test_stale_overlay_is_replaced_then_restored() {
    let h = harness();
    let doc = long_article_page();
    doc.append_element(OVERLAY_CONTAINER_ID, "<p>from a dead context</p>");
    let before = doc.html();

    assert!(h.host.block_on(h.controller.activate(&doc)));
    assert_eq!(doc.count_elements_by_id(OVERLAY_CONTAINER_ID), 1);
    let container = doc.element_by_id(OVERLAY_CONTAINER_ID).unwrap();
    assert!(!container.inner_html().contains("dead context"));

    h.host.block_on(h.controller.deactivate(&doc));
    assert_eq!(doc.html(), before);
}

#[test]
fn test_stale_overlay_stays_single_across_cycles() {
    let h = harness();
    let doc = long_article_page();
    doc.append_element(OVERLAY_CONTAINER_ID, "<p>stale</p>");
    let before = doc.html();

    assert!(h.host.block_on(h.controller.activate(&doc)));
    h.host.block_on(h.controller.deactivate(&doc));
    assert_eq!(doc.html(), before);

    assert!(h.host.block_on(h.controller.activate(&doc)));
    assert_eq!(doc.count_elements_by_id(OVERLAY_CONTAINER_ID), 1);
    let container = doc.element_by_id(OVERLAY_CONTAINER_ID).unwrap();
    assert!(!container.inner_html().contains("stale"));

    h.host.block_on(h.controller.deactivate(&doc));
    assert_eq!(doc.html(), before);
}

#[test]
fn test_page_script_changes_are_overwritten_by_snapshot() {
    let h = harness();
    let doc = long_article_page();
    let before = doc.html();

    assert!(h.host.block_on(h.controller.activate(&doc)));
    doc.set_page_markup("<p>rewritten by the page while hidden</p>");
    doc.set_title("changed");

    h.host.block_on(h.controller.deactivate(&doc));
    assert_eq!(doc.html(), before);
    assert_eq!(doc.title(), "Why Slow Reading Matters | Blog");
}

#[test]
fn test_snapshot_persisted_while_active() {
    let h = harness();
    let doc = long_article_page();
    let before = doc.html();

    h.host.block_on(h.controller.activate(&doc));
    let stored = h.backend.value("readerViewSnapshot").unwrap();
    assert_eq!(stored["html"], serde_json::Value::String(before));

    h.host.block_on(h.controller.deactivate(&doc));
    assert!(!h.backend.contains("readerViewSnapshot"));
}

#[test]
fn test_double_toggle_with_suspending_backend() {
    let h = harness();
    h.backend.yield_on_io(true);
    let doc = long_article_page();
    let before = doc.html();

    let counts = Rc::new(RefCell::new(Vec::new()));
    let (c, d) = (counts.clone(), doc.clone());
    h.controller
        .store()
        .add_state_change_listener(Rc::new(move |_: &UiState, _: &UiState| {
            c.borrow_mut().push(d.count_elements_by_id(OVERLAY_CONTAINER_ID))
        }))
        .unwrap();

    let (first, second) = h.host.block_on(futures::future::join(
        h.controller.toggle(&doc),
        h.controller.toggle(&doc),
    ));

    // The first activation completed every step before the second toggle
    // took the overlay down.
    assert!(first);
    assert!(!second);
    assert!(!h.controller.is_active());

    assert!(counts.borrow().iter().all(|count| *count <= 1));
    assert_eq!(doc.count_elements_by_id(OVERLAY_CONTAINER_ID), 0);
    assert_eq!(doc.html(), before);
}

fn page_strategy() -> impl Strategy<Value = (MemoryDocument, bool)> {
    (
        prop::collection::vec("[a-z ]{1,40}", 0..6),
        "[A-Za-z ]{0,30}",
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(paragraphs, title, readable, stale)| {
            let body: String = paragraphs.iter().map(|p| format!("<p>{p}</p>")).collect();
            let article = if readable {
                format!("<article><h1>{title}</h1>{}</article>", "<p>long enough text</p>".repeat(8))
            } else {
                String::new()
            };
            let doc = MemoryDocument::new(format!("<main>{body}</main>{article}"), title, "https://p.test/");
            if stale {
                doc.append_element(OVERLAY_CONTAINER_ID, "stale");
            }
            (doc, readable)
        })
}

proptest! {
    #[test]
    fn prop_activate_then_deactivate_restores_bytes((doc, readable) in page_strategy()) {
        let h = harness();
        let before = doc.html();
        let title = doc.title();

        let activated = h.host.block_on(h.controller.activate(&doc));
        prop_assert_eq!(activated, readable);
        h.host.block_on(h.controller.deactivate(&doc));

        prop_assert_eq!(doc.html(), before);
        prop_assert_eq!(doc.title(), title);
        prop_assert!(!h.controller.store().get_state().unwrap().is_reader_view_active());
    }

    #[test]
    fn prop_unreadable_page_is_untouched(text in "[a-z <>/]{0,200}") {
        prop_assume!(!text.contains("<article"));
        let h = harness();
        let doc = MemoryDocument::new(text, "Untitled", "https://p.test/");
        let before = doc.html();

        prop_assert!(!h.host.block_on(h.controller.activate(&doc)));
        prop_assert_eq!(doc.html(), before);
        prop_assert!(!h.controller.store().get_state().unwrap().is_reader_view_active());
    }

    #[test]
    fn prop_overlapping_toggles_keep_one_container(toggles in 2usize..7, suspend in any::<bool>()) {
        let h = harness();
        h.backend.yield_on_io(suspend);
        let doc = long_article_page();
        let before = doc.html();

        let max_seen = Rc::new(RefCell::new(0usize));
        let (m, d) = (max_seen.clone(), doc.clone());
        h.controller
            .store()
            .add_state_change_listener(Rc::new(move |_: &UiState, _: &UiState| {
                let count = d.count_elements_by_id(OVERLAY_CONTAINER_ID);
                let mut max = m.borrow_mut();
                *max = (*max).max(count);
            }))
            .unwrap();

        h.host.block_on(join_all((0..toggles).map(|_| h.controller.toggle(&doc))));

        let containers = doc.count_elements_by_id(OVERLAY_CONTAINER_ID);
        prop_assert!(*max_seen.borrow() <= 1);
        prop_assert!(containers <= 1);
        prop_assert_eq!(containers == 1, h.controller.has_live_session());
        if containers == 0 {
            prop_assert_eq!(doc.html(), before);
        }
    }
}
