//! Shared fixtures for the reader overlay integration tests.
//!
//! Everything runs on a `ManualHost`: timers only fire on `advance`, and
//! spawned tasks only run when the host's pool is driven.

#![allow(dead_code)]

use reader_overlay::{
    ArticleTagExtractor, InMemoryBackend, ManualHost, MarkupMounter, MemoryDocument,
    ReaderConfig, ReaderContent, ReaderViewController, ResourceLifecycleManager,
    ValiditySignal, ViewMounter,
};
use reader_overlay::document::MemoryContainer;
use reader_overlay::error::MountError;
use std::cell::Cell;
use std::rc::Rc;

pub type TestController = ReaderViewController<MemoryDocument, ArticleTagExtractor, TestMounter>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    Render,
    Fail,
    Panic,
}

/// Markup mounter with switchable failure modes and call counters.
#[derive(Debug, Clone)]
pub struct TestMounter {
    mode: Rc<Cell<MountMode>>,
    mounts: Rc<Cell<usize>>,
    unmounts: Rc<Cell<usize>>,
}

impl TestMounter {
    pub fn new() -> Self {
        Self {
            mode: Rc::new(Cell::new(MountMode::Render)),
            mounts: Rc::new(Cell::new(0)),
            unmounts: Rc::new(Cell::new(0)),
        }
    }

    pub fn set_mode(&self, mode: MountMode) {
        self.mode.set(mode);
    }

    pub fn mounts(&self) -> usize {
        self.mounts.get()
    }

    pub fn unmounts(&self) -> usize {
        self.unmounts.get()
    }
}

impl ViewMounter<MemoryContainer> for TestMounter {
    type Handle = MemoryContainer;

    fn mount(
        &self,
        container: &MemoryContainer,
        content: &ReaderContent,
    ) -> Result<MemoryContainer, MountError> {
        self.mounts.set(self.mounts.get() + 1);
        match self.mode.get() {
            MountMode::Render => MarkupMounter.mount(container, content),
            MountMode::Fail => Err(MountError::Render("renderer rejected content".into())),
            MountMode::Panic => panic!("renderer crashed"),
        }
    }

    fn unmount(&self, handle: MemoryContainer) {
        self.unmounts.set(self.unmounts.get() + 1);
        MarkupMounter.unmount(handle);
    }
}

pub struct Harness {
    pub signal: ValiditySignal,
    pub host: Rc<ManualHost>,
    pub manager: ResourceLifecycleManager,
    pub backend: InMemoryBackend,
    pub mounter: TestMounter,
    pub controller: TestController,
}

/// Defaults, with periodic sync off.
pub fn quiet_config() -> ReaderConfig {
    ReaderConfig {
        sync_interval_ms: 0,
        ..ReaderConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(quiet_config(), InMemoryBackend::new())
}

/// Build a controller and let the store's seed read finish.
pub fn harness_with(config: ReaderConfig, backend: InMemoryBackend) -> Harness {
    let signal = ValiditySignal::new();
    let host = Rc::new(ManualHost::new());
    let manager = ResourceLifecycleManager::new(signal.clone(), host.clone());
    let mounter = TestMounter::new();
    let controller = ReaderViewController::new(
        manager.clone(),
        Rc::new(backend.clone()),
        ArticleTagExtractor::new(config.min_content_chars),
        mounter.clone(),
        config,
    );
    host.run_until_stalled();
    Harness {
        signal,
        host,
        manager,
        backend,
        mounter,
        controller,
    }
}

pub const LONG_ARTICLE_TITLE: &str = "Why Slow Reading Matters";

pub fn long_article_page() -> MemoryDocument {
    let paragraph = "<p>Reading slowly gives an argument room to unfold, one sentence at a time.</p>";
    MemoryDocument::new(
        format!(
            "<header><nav>Home | Archive</nav></header>\
             <article><h1>{LONG_ARTICLE_TITLE}</h1>{}</article>\
             <footer>(c) blog</footer>",
            paragraph.repeat(5)
        ),
        "Why Slow Reading Matters | Blog",
        "https://blog.test/slow-reading",
    )
}

pub fn short_article_page() -> MemoryDocument {
    MemoryDocument::new(
        "<article><h1>Note</h1><p>Back soon.</p></article>",
        "Note",
        "https://blog.test/note",
    )
}
