//! Document model
//!
//! [`PageDocument`] is the narrow set of document capabilities the
//! activation controller needs: serialize, hide/unhide, create/remove the
//! overlay container, and restore from a [`PageSnapshot`]. The browser
//! implementation lives in `crate::web`; [`MemoryDocument`] is a markup-only
//! document for native hosts and tests.

use crate::error::DomError;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt::Write as _;
use std::ops::Range;
use std::rc::Rc;

/// Element id of the overlay container. One per document.
pub const OVERLAY_CONTAINER_ID: &str = "reader-view-root";

/// Upper bound on stale containers removed in one pass.
const MAX_STALE_CONTAINERS: usize = 64;

/// Full document HTML and title captured before mounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub html: String,
    pub title: String,
}

impl PageSnapshot {
    pub fn capture<D: PageDocument + ?Sized>(document: &D) -> Result<Self, DomError> {
        Ok(Self {
            html: document.serialize()?,
            title: document.title(),
        })
    }

    /// Whether `document` currently serializes to exactly this snapshot.
    pub fn matches<D: PageDocument + ?Sized>(&self, document: &D) -> bool {
        match document.serialize() {
            Ok(html) => html == self.html && document.title() == self.title,
            Err(_) => false,
        }
    }
}

/// Document capabilities used by the activation controller.
///
/// Methods take `&self`: documents are shared handles, as in the DOM.
pub trait PageDocument {
    type Container: Clone;

    /// Full document markup.
    fn serialize(&self) -> Result<String, DomError>;

    fn title(&self) -> String;

    /// Current page URL.
    fn location(&self) -> String;

    fn count_elements_by_id(&self, id: &str) -> usize;

    /// Remove one element with `id`. Returns whether one was found.
    fn remove_element_by_id(&self, id: &str) -> bool;

    /// Create and attach an empty container element with `id`.
    fn create_container(&self, id: &str) -> Result<Self::Container, DomError>;

    fn remove_container(&self, container: &Self::Container);

    /// Hide or reveal the original page content. Reversible; the overlay
    /// container is never hidden.
    fn set_page_hidden(&self, hidden: bool) -> Result<(), DomError>;

    /// Overwrite the document with `snapshot`.
    fn restore(&self, snapshot: &PageSnapshot) -> Result<(), DomError>;

    /// Whether the container renders into an attached shadow root.
    fn has_shadow_root(&self, _container: &Self::Container) -> bool {
        false
    }
}

/// Remove every element carrying the overlay id. Returns how many went.
pub fn remove_stale_containers<D: PageDocument + ?Sized>(document: &D) -> usize {
    let mut removed = 0;
    while removed < MAX_STALE_CONTAINERS && document.remove_element_by_id(OVERLAY_CONTAINER_ID) {
        removed += 1;
    }
    removed
}

// ===== IN-MEMORY DOCUMENT =====

/// Byte range of the first `<div id="{id}">...</div>` in `markup`,
/// nested `div`s included.
fn div_span(markup: &str, id: &str) -> Option<Range<usize>> {
    let start = markup.find(&format!(r#"<div id="{id}">"#))?;
    let mut depth = 0usize;
    let mut cursor = start;
    loop {
        let rest = &markup[cursor..];
        let close = rest.find("</div>")?;
        match rest.find("<div") {
            Some(open) if open < close => {
                depth += 1;
                cursor += open + "<div".len();
            }
            _ => {
                depth -= 1;
                cursor += close + "</div>".len();
                if depth == 0 {
                    return Some(start..cursor);
                }
            }
        }
    }
}

#[derive(Debug)]
struct ContainerInner {
    id: String,
    markup: RefCell<String>,
    shadow_root: bool,
}

/// An element appended to a [`MemoryDocument`]. Clones share the element.
#[derive(Debug, Clone)]
pub struct MemoryContainer {
    inner: Rc<ContainerInner>,
}

impl MemoryContainer {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn inner_html(&self) -> String {
        self.inner.markup.borrow().clone()
    }

    pub fn set_inner_html(&self, markup: impl Into<String>) {
        *self.inner.markup.borrow_mut() = markup.into();
    }

    fn same_element(&self, other: &MemoryContainer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug, Default)]
struct DocumentInner {
    page: RefCell<String>,
    title: RefCell<String>,
    location: String,
    hidden: Cell<bool>,
    appended: RefCell<Vec<MemoryContainer>>,
    shadow_roots: Cell<bool>,
    fail_create: Cell<bool>,
    fail_hide: Cell<bool>,
    serialize_unsupported: Cell<bool>,
}

/// Markup-only document.
///
/// Serializes as the page markup (wrapped in a hidden `div` while hidden)
/// followed by every appended element. Clones share the same document.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    inner: Rc<DocumentInner>,
}

impl MemoryDocument {
    pub fn new(
        page: impl Into<String>,
        title: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            inner: Rc::new(DocumentInner {
                page: RefCell::new(page.into()),
                title: RefCell::new(title.into()),
                location: location.into(),
                ..Default::default()
            }),
        }
    }

    /// Append an element outside the page markup, e.g. an overlay left
    /// behind by an earlier context.
    pub fn append_element(&self, id: &str, markup: &str) -> MemoryContainer {
        let container = MemoryContainer {
            inner: Rc::new(ContainerInner {
                id: id.to_string(),
                markup: RefCell::new(markup.to_string()),
                shadow_root: self.inner.shadow_roots.get(),
            }),
        };
        self.inner.appended.borrow_mut().push(container.clone());
        container
    }

    /// Look up an appended element.
    pub fn element_by_id(&self, id: &str) -> Option<MemoryContainer> {
        self.inner
            .appended
            .borrow()
            .iter()
            .find(|container| container.id() == id)
            .cloned()
    }

    pub fn is_page_hidden(&self) -> bool {
        self.inner.hidden.get()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        *self.inner.title.borrow_mut() = title.into();
    }

    /// Replace the page markup, as a script on the page would.
    pub fn set_page_markup(&self, markup: impl Into<String>) {
        *self.inner.page.borrow_mut() = markup.into();
    }

    /// New containers report an attached shadow root.
    pub fn use_shadow_roots(&self, enabled: bool) {
        self.inner.shadow_roots.set(enabled);
    }

    pub fn fail_container_creation(&self, fail: bool) {
        self.inner.fail_create.set(fail);
    }

    pub fn fail_hiding(&self, fail: bool) {
        self.inner.fail_hide.set(fail);
    }

    pub fn disable_serialization(&self, disabled: bool) {
        self.inner.serialize_unsupported.set(disabled);
    }

    /// Current serialization, ignoring injected failures.
    pub fn html(&self) -> String {
        let inner = &self.inner;
        let mut html = String::new();
        if inner.hidden.get() {
            html.push_str(r#"<div data-reader-hidden="true" style="display: none">"#);
            html.push_str(&inner.page.borrow());
            html.push_str("</div>");
        } else {
            html.push_str(&inner.page.borrow());
        }
        for container in inner.appended.borrow().iter() {
            let _ = write!(
                html,
                r#"<div id="{}">{}</div>"#,
                container.id(),
                container.inner.markup.borrow()
            );
        }
        html
    }
}

impl PageDocument for MemoryDocument {
    type Container = MemoryContainer;

    fn serialize(&self) -> Result<String, DomError> {
        if self.inner.serialize_unsupported.get() {
            return Err(DomError::Unsupported("document serialization".into()));
        }
        Ok(self.html())
    }

    fn title(&self) -> String {
        self.inner.title.borrow().clone()
    }

    fn location(&self) -> String {
        self.inner.location.clone()
    }

    fn count_elements_by_id(&self, id: &str) -> usize {
        let needle = format!(r#"id="{id}""#);
        let in_page = self.inner.page.borrow().matches(needle.as_str()).count();
        let appended = self
            .inner
            .appended
            .borrow()
            .iter()
            .filter(|container| container.id() == id)
            .count();
        in_page + appended
    }

    fn remove_element_by_id(&self, id: &str) -> bool {
        let mut appended = self.inner.appended.borrow_mut();
        if let Some(index) = appended.iter().position(|container| container.id() == id) {
            appended.remove(index);
            return true;
        }

        // Restoring a snapshot flattens appended elements into the page.
        let mut page = self.inner.page.borrow_mut();
        match div_span(&page, id) {
            Some(span) => {
                page.replace_range(span, "");
                true
            }
            None => false,
        }
    }

    fn create_container(&self, id: &str) -> Result<MemoryContainer, DomError> {
        if self.inner.fail_create.get() {
            return Err(DomError::Unsupported("element creation".into()));
        }
        Ok(self.append_element(id, ""))
    }

    fn remove_container(&self, container: &MemoryContainer) {
        self.inner
            .appended
            .borrow_mut()
            .retain(|existing| !existing.same_element(container));
    }

    fn set_page_hidden(&self, hidden: bool) -> Result<(), DomError> {
        if hidden && self.inner.fail_hide.get() {
            return Err(DomError::Operation("could not hide page content".into()));
        }
        self.inner.hidden.set(hidden);
        Ok(())
    }

    fn restore(&self, snapshot: &PageSnapshot) -> Result<(), DomError> {
        *self.inner.page.borrow_mut() = snapshot.html.clone();
        *self.inner.title.borrow_mut() = snapshot.title.clone();
        self.inner.appended.borrow_mut().clear();
        self.inner.hidden.set(false);
        Ok(())
    }

    fn has_shadow_root(&self, container: &MemoryContainer) -> bool {
        container.inner.shadow_root
    }
}
