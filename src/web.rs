//! Browser Bindings
//!
//! Connects the overlay to the real page and to the extension's JavaScript:
//!
//! ```text
//! JS content script ──new ReaderOverlay(extract, mount, unmount, config)──► ReaderOverlay
//!                                                                              │
//!        WebHost (window timers, addEventListener, spawn_local) ◄──────────────┤
//!        WebDocument (document.documentElement, body children)  ◄──────────────┤
//!        WebStorageBackend (window.sessionStorage)               ◄──────────────┤
//!        JsExtractor / JsMounter (JS collaborator functions)     ◄──────────────┘
//! ```

use crate::backend::PersistentStateBackend;
use crate::commands::install_command_bridge;
use crate::config::ReaderConfig;
use crate::content::{ContentExtractor, ExtractionResult, RawArticle, ReaderContent};
use crate::controller::ReaderViewController;
use crate::document::{PageDocument, PageSnapshot, OVERLAY_CONTAINER_ID};
use crate::error::{BackendError, DomError, HostError, MountError};
use crate::host::{
    EventListener, HostEnvironment, HostEvent, ListenerKey, ListenerOptions, ListenerTarget,
    TimerId,
};
use crate::lifecycle::ResourceLifecycleManager;
use crate::mount::ViewMounter;
use crate::validity::ValiditySignal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    AddEventListenerOptions, CustomEvent, DomParser, Element, EventTarget, KeyboardEvent,
    ShadowRoot, ShadowRootInit, ShadowRootMode, Storage, SupportedType, Window,
};

/// Best-effort message out of a thrown JS value.
fn js_error(value: &JsValue) -> String {
    if let Some(message) = value.as_string() {
        return message;
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    format!("{value:?}")
}

// ===== HOST =====

struct AttachedListener {
    target: EventTarget,
    event_type: String,
    capture: bool,
    closure: Closure<dyn FnMut(web_sys::Event)>,
}

/// [`HostEnvironment`] over `window`.
///
/// Keeps every closure handed to JS alive until its timer/listener is
/// cleared. Fired one-shot closures are dropped on the next registration.
pub struct WebHost {
    window: Window,
    timeouts: RefCell<HashMap<TimerId, Closure<dyn FnMut()>>>,
    fired: Rc<RefCell<Vec<TimerId>>>,
    intervals: RefCell<HashMap<TimerId, Closure<dyn FnMut()>>>,
    listeners: RefCell<HashMap<ListenerKey, AttachedListener>>,
    next_listener: Cell<ListenerKey>,
}

impl WebHost {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            timeouts: RefCell::new(HashMap::new()),
            fired: Rc::new(RefCell::new(Vec::new())),
            intervals: RefCell::new(HashMap::new()),
            listeners: RefCell::new(HashMap::new()),
            next_listener: Cell::new(1),
        }
    }

    fn drop_fired_timeouts(&self) {
        let fired: Vec<TimerId> = self.fired.borrow_mut().drain(..).collect();
        let mut timeouts = self.timeouts.borrow_mut();
        for id in fired {
            timeouts.remove(&id);
        }
    }

    fn resolve_target(&self, target: &ListenerTarget) -> Result<EventTarget, HostError> {
        match target {
            ListenerTarget::Window => Ok(self.window.clone().into()),
            ListenerTarget::Document => self
                .window
                .document()
                .map(Into::into)
                .ok_or_else(|| HostError::Listener("no document".into())),
            ListenerTarget::Element(id) => self
                .window
                .document()
                .and_then(|document| document.get_element_by_id(id))
                .map(Into::into)
                .ok_or_else(|| HostError::Listener(format!("no element #{id}"))),
        }
    }
}

fn to_host_event(event: &web_sys::Event) -> HostEvent {
    let key = event.dyn_ref::<KeyboardEvent>().map(KeyboardEvent::key);
    let detail = event
        .dyn_ref::<CustomEvent>()
        .map(|custom| serde_wasm_bindgen::from_value(custom.detail()).unwrap_or(Value::Null))
        .unwrap_or(Value::Null);
    HostEvent {
        event_type: event.type_(),
        key,
        detail,
    }
}

impl HostEnvironment for WebHost {
    fn set_timeout(
        &self,
        callback: Box<dyn FnOnce()>,
        delay_ms: u32,
    ) -> Result<TimerId, HostError> {
        self.drop_fired_timeouts();

        let id_slot = Rc::new(Cell::new(0));
        let fired = self.fired.clone();
        let slot = id_slot.clone();
        let mut callback = Some(callback);
        let closure = Closure::<dyn FnMut()>::new(move || {
            fired.borrow_mut().push(slot.get());
            if let Some(callback) = callback.take() {
                callback();
            }
        });

        let delay = i32::try_from(delay_ms).unwrap_or(i32::MAX);
        let id = self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                delay,
            )
            .map_err(|e| HostError::Timer(js_error(&e)))?;
        id_slot.set(id);
        self.timeouts.borrow_mut().insert(id, closure);
        Ok(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        self.window.clear_timeout_with_handle(id);
        self.timeouts.borrow_mut().remove(&id);
    }

    fn set_interval(
        &self,
        callback: Rc<dyn Fn()>,
        interval_ms: u32,
    ) -> Result<TimerId, HostError> {
        let closure = Closure::<dyn FnMut()>::new(move || callback());
        let interval = i32::try_from(interval_ms).unwrap_or(i32::MAX);
        let id = self
            .window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                interval,
            )
            .map_err(|e| HostError::Timer(js_error(&e)))?;
        self.intervals.borrow_mut().insert(id, closure);
        Ok(id)
    }

    fn clear_interval(&self, id: TimerId) {
        self.window.clear_interval_with_handle(id);
        self.intervals.borrow_mut().remove(&id);
    }

    fn add_event_listener(
        &self,
        target: &ListenerTarget,
        event_type: &str,
        listener: EventListener,
        options: ListenerOptions,
    ) -> Result<ListenerKey, HostError> {
        let event_target = self.resolve_target(target)?;
        let closure = Closure::<dyn FnMut(web_sys::Event)>::new(move |event: web_sys::Event| {
            listener(&to_host_event(&event));
        });

        let js_options = AddEventListenerOptions::new();
        js_options.set_capture(options.capture);
        js_options.set_once(options.once);
        js_options.set_passive(options.passive);
        event_target
            .add_event_listener_with_callback_and_add_event_listener_options(
                event_type,
                closure.as_ref().unchecked_ref(),
                &js_options,
            )
            .map_err(|e| HostError::Listener(js_error(&e)))?;

        let key = self.next_listener.get();
        self.next_listener.set(key + 1);
        self.listeners.borrow_mut().insert(
            key,
            AttachedListener {
                target: event_target,
                event_type: event_type.to_string(),
                capture: options.capture,
                closure,
            },
        );
        Ok(key)
    }

    fn remove_event_listener(&self, key: ListenerKey) {
        let Some(attached) = self.listeners.borrow_mut().remove(&key) else {
            return;
        };
        if let Err(e) = attached.target.remove_event_listener_with_callback_and_bool(
            &attached.event_type,
            attached.closure.as_ref().unchecked_ref(),
            attached.capture,
        ) {
            warn!(event_type = %attached.event_type, error = %js_error(&e), "removeEventListener failed");
        }
    }

    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ===== DOCUMENT =====

/// Overlay container element, optionally hosting a shadow root.
#[derive(Debug, Clone)]
pub struct WebContainer {
    host: Element,
    shadow: Option<ShadowRoot>,
}

impl WebContainer {
    /// Node the view renders into.
    pub fn mount_target(&self) -> JsValue {
        match &self.shadow {
            Some(shadow) => shadow.clone().into(),
            None => self.host.clone().into(),
        }
    }
}

/// [`PageDocument`] over the live `document`.
///
/// Hiding sets `display: none` on each body child and remembers the
/// original `style` attribute so revealing is exact.
#[derive(Debug, Clone)]
pub struct WebDocument {
    document: web_sys::Document,
    hidden: Rc<RefCell<Vec<(Element, Option<String>)>>>,
}

impl WebDocument {
    pub fn new(document: web_sys::Document) -> Self {
        Self {
            document,
            hidden: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn raw(&self) -> &web_sys::Document {
        &self.document
    }

    fn root(&self) -> Result<Element, DomError> {
        self.document
            .document_element()
            .ok_or_else(|| DomError::Unsupported("document.documentElement".into()))
    }

    fn reveal(&self) -> Result<(), DomError> {
        let hidden: Vec<(Element, Option<String>)> = self.hidden.borrow_mut().drain(..).collect();
        let mut failure = None;
        for (element, style) in hidden {
            let result = match style {
                Some(style) => element.set_attribute("style", &style),
                None => element.remove_attribute("style"),
            };
            if let Err(e) = result {
                failure = Some(DomError::Operation(js_error(&e)));
            }
        }
        failure.map_or(Ok(()), Err)
    }

    fn hide(&self) -> Result<(), DomError> {
        let body = self
            .document
            .body()
            .ok_or_else(|| DomError::Unsupported("document.body".into()))?;
        let children = body.children();
        for index in 0..children.length() {
            let Some(child) = children.item(index) else {
                continue;
            };
            if child.id() == OVERLAY_CONTAINER_ID {
                continue;
            }
            let previous = child.get_attribute("style");
            if let Err(e) = child.set_attribute("style", "display: none !important") {
                if let Err(reveal) = self.reveal() {
                    warn!(error = %reveal, "could not reveal page after failed hide");
                }
                return Err(DomError::Operation(js_error(&e)));
            }
            self.hidden.borrow_mut().push((child, previous));
        }
        Ok(())
    }
}

impl PageDocument for WebDocument {
    type Container = WebContainer;

    fn serialize(&self) -> Result<String, DomError> {
        Ok(self.root()?.outer_html())
    }

    fn title(&self) -> String {
        self.document.title()
    }

    fn location(&self) -> String {
        self.document
            .location()
            .and_then(|location| location.href().ok())
            .unwrap_or_default()
    }

    fn count_elements_by_id(&self, id: &str) -> usize {
        self.document
            .query_selector_all(&format!("[id=\"{id}\"]"))
            .map(|nodes| nodes.length() as usize)
            .unwrap_or(0)
    }

    fn remove_element_by_id(&self, id: &str) -> bool {
        match self.document.get_element_by_id(id) {
            Some(element) => {
                element.remove();
                true
            }
            None => false,
        }
    }

    fn create_container(&self, id: &str) -> Result<WebContainer, DomError> {
        let host = self
            .document
            .create_element("div")
            .map_err(|e| DomError::Unsupported(js_error(&e)))?;
        host.set_id(id);

        let parent: web_sys::Node = match self.document.body() {
            Some(body) => body.into(),
            None => self.root()?.into(),
        };
        parent
            .append_child(&host)
            .map_err(|e| DomError::Operation(js_error(&e)))?;

        let shadow = match host.attach_shadow(&ShadowRootInit::new(ShadowRootMode::Open)) {
            Ok(shadow) => Some(shadow),
            Err(e) => {
                debug!(error = %js_error(&e), "shadow root unavailable; mounting into container");
                None
            }
        };
        Ok(WebContainer { host, shadow })
    }

    fn remove_container(&self, container: &WebContainer) {
        container.host.remove();
    }

    fn set_page_hidden(&self, hidden: bool) -> Result<(), DomError> {
        if hidden {
            self.hide()
        } else {
            self.reveal()
        }
    }

    fn restore(&self, snapshot: &PageSnapshot) -> Result<(), DomError> {
        let parser = DomParser::new().map_err(|e| DomError::Unsupported(js_error(&e)))?;
        let parsed = parser
            .parse_from_string(&snapshot.html, SupportedType::TextHtml)
            .map_err(|e| DomError::Operation(js_error(&e)))?;
        let parsed_root = parsed
            .document_element()
            .ok_or_else(|| DomError::Operation("snapshot has no root element".into()))?;

        let adopted = self
            .document
            .adopt_node(&parsed_root)
            .map_err(|e| DomError::Operation(js_error(&e)))?;
        let current = self.root()?;
        self.document
            .replace_child(&adopted, &current)
            .map_err(|e| DomError::Operation(js_error(&e)))?;
        self.document.set_title(&snapshot.title);
        self.hidden.borrow_mut().clear();
        Ok(())
    }

    fn has_shadow_root(&self, container: &WebContainer) -> bool {
        container.shadow.is_some()
    }
}

// ===== STORAGE =====

/// [`PersistentStateBackend`] over `window.sessionStorage`, JSON encoded.
pub struct WebStorageBackend {
    storage: Storage,
}

impl WebStorageBackend {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn session(window: &Window) -> Result<Self, BackendError> {
        window
            .session_storage()
            .map_err(|e| BackendError::Unavailable(js_error(&e)))?
            .map(Self::new)
            .ok_or_else(|| BackendError::Unavailable("sessionStorage".into()))
    }
}

#[async_trait(?Send)]
impl PersistentStateBackend for WebStorageBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, BackendError> {
        let raw = self.storage.get_item(key).map_err(|e| BackendError::Read {
            key: key.to_string(),
            message: js_error(&e),
        })?;
        raw.map(|text| {
            serde_json::from_str(&text).map_err(|e| BackendError::Malformed {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BackendError> {
        let write_error = |message: String| BackendError::Write {
            key: key.to_string(),
            message,
        };
        let text = serde_json::to_string(&value).map_err(|e| write_error(e.to_string()))?;
        self.storage
            .set_item(key, &text)
            .map_err(|e| write_error(js_error(&e)))
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.storage.remove_item(key).map_err(|e| BackendError::Write {
            key: key.to_string(),
            message: js_error(&e),
        })
    }
}

// ===== JS COLLABORATORS =====

/// Readability collaborator: `extract(document) -> {title, content, ...} | null`.
///
/// The JS side must work on its own clone of the document.
pub struct JsExtractor {
    function: js_sys::Function,
    min_chars: usize,
}

impl JsExtractor {
    pub fn new(function: js_sys::Function, min_chars: usize) -> Self {
        Self {
            function,
            min_chars,
        }
    }
}

impl ContentExtractor<WebDocument> for JsExtractor {
    fn extract(&self, document: &WebDocument) -> ExtractionResult {
        let value = match self.function.call1(&JsValue::NULL, document.raw()) {
            Ok(value) => value,
            Err(e) => return ExtractionResult::Unreadable(js_error(&e)),
        };
        if value.is_null() || value.is_undefined() {
            return ExtractionResult::from_raw(None, &document.title(), self.min_chars);
        }
        match serde_wasm_bindgen::from_value::<RawArticle>(value) {
            Ok(raw) => ExtractionResult::from_raw(Some(raw), &document.title(), self.min_chars),
            Err(e) => ExtractionResult::Unreadable(format!("unexpected article shape: {e}")),
        }
    }
}

/// Rendering collaborator: `mount(target, content) -> handle`, `unmount(handle)`.
pub struct JsMounter {
    mount: js_sys::Function,
    unmount: js_sys::Function,
}

impl JsMounter {
    pub fn new(mount: js_sys::Function, unmount: js_sys::Function) -> Self {
        Self { mount, unmount }
    }
}

impl ViewMounter<WebContainer> for JsMounter {
    type Handle = JsValue;

    fn mount(&self, container: &WebContainer, content: &ReaderContent) -> Result<JsValue, MountError> {
        let content = serde_wasm_bindgen::to_value(content)
            .map_err(|e| MountError::Render(e.to_string()))?;
        self.mount
            .call2(&JsValue::NULL, &container.mount_target(), &content)
            .map_err(|e| MountError::Render(js_error(&e)))
    }

    fn unmount(&self, handle: JsValue) {
        if let Err(e) = self.unmount.call1(&JsValue::NULL, &handle) {
            warn!(error = %js_error(&e), "view unmount threw");
        }
    }
}

// ===== JS API =====

type WebController = ReaderViewController<WebDocument, JsExtractor, JsMounter>;

/// Reader overlay for the current page, driven from the content script.
#[wasm_bindgen]
pub struct ReaderOverlay {
    signal: ValiditySignal,
    document: WebDocument,
    controller: WebController,
}

#[wasm_bindgen]
impl ReaderOverlay {
    /// `config` is an optional object with `ReaderConfig` fields
    /// (camelCase); missing fields take their defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(
        extract: js_sys::Function,
        mount: js_sys::Function,
        unmount: js_sys::Function,
        config: JsValue,
    ) -> Result<ReaderOverlay, JsValue> {
        let config: ReaderConfig = if config.is_null() || config.is_undefined() {
            ReaderConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)?
        };
        config
            .validate()
            .map_err(|e| JsValue::from_str(&e.to_string()))?;

        let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("No document"))?;
        let backend =
            WebStorageBackend::session(&window).map_err(|e| JsValue::from_str(&e.to_string()))?;

        let signal = ValiditySignal::new();
        let manager = ResourceLifecycleManager::new(signal.clone(), Rc::new(WebHost::new(window)));
        let controller = ReaderViewController::new(
            manager,
            Rc::new(backend),
            JsExtractor::new(extract, config.min_content_chars),
            JsMounter::new(mount, unmount),
            config,
        );
        let document = WebDocument::new(document);
        install_command_bridge(&controller, &document);
        info!(url = %document.location(), "reader overlay ready");

        Ok(Self {
            signal,
            document,
            controller,
        })
    }

    /// Resolves to whether the overlay is shown afterwards.
    pub fn toggle(&self) -> js_sys::Promise {
        let controller = self.controller.clone();
        let document = self.document.clone();
        wasm_bindgen_futures::future_to_promise(async move {
            Ok(JsValue::from_bool(controller.toggle(&document).await))
        })
    }

    pub fn activate(&self) -> js_sys::Promise {
        let controller = self.controller.clone();
        let document = self.document.clone();
        wasm_bindgen_futures::future_to_promise(async move {
            Ok(JsValue::from_bool(controller.activate(&document).await))
        })
    }

    pub fn deactivate(&self) -> js_sys::Promise {
        let controller = self.controller.clone();
        let document = self.document.clone();
        wasm_bindgen_futures::future_to_promise(async move {
            controller.deactivate(&document).await;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = isActive)]
    pub fn is_active(&self) -> bool {
        self.controller.is_active()
    }

    /// Why the last activation returned false.
    #[wasm_bindgen(js_name = lastFailure)]
    pub fn last_failure(&self) -> Option<String> {
        self.controller.last_failure().map(|failure| failure.to_string())
    }

    /// Hook for the extension's context-invalidated notification.
    pub fn invalidate(&self) {
        if self.signal.invalidate() {
            info!("reader overlay context invalidated");
        }
    }
}
