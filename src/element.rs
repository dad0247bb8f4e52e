//! Live component instances.
//!
//! An [`Element`] is a cheap-clone handle to one instance of a [`Definition`]. It owns the
//! per-instance property table, the `data` mapping templates render against, the frozen light-DOM
//! contents used for slots, and the lifecycle:
//!
//! ```text
//! Constructed → Connecting → Connected ⇄ Rendering
//!                    ↑            ↓
//!                    └──── Disconnected
//! ```
//!
//! Connecting waits for the definition's scripts on the event loop; everything after that
//! (event scripts, `preconnect`, attribute merge, accessors, `connect`, first render) runs in one
//! task once they have loaded.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::channel::oneshot;
use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;
use indexmap::{IndexMap, IndexSet};
use serde_json::{json, Map, Value};
use tracing::{debug, error, trace};

use crate::component::{camelize, split_typed_name, PropertyDecl};
use crate::definition::Definition;
use crate::dom::Contents;
use crate::error::{Result, ScriptError};
use crate::factory::Runtime;
use crate::host::Document;
use crate::preprocess::EventScript;
use crate::script::{Functions, Scope};
use crate::types::{ParseContext, Parsed};

/// Built-in element capabilities a declared property never shadows.
const BUILTIN_PROPERTIES: &[&str] = &[
    "id",
    "title",
    "lang",
    "dir",
    "hidden",
    "slot",
    "style",
    "className",
    "classList",
    "dataset",
    "tabIndex",
    "accessKey",
    "draggable",
    "translate",
    "spellcheck",
    "autofocus",
    "inert",
    "nonce",
    "contentEditable",
    "innerHTML",
    "outerHTML",
    "innerText",
    "textContent",
    "tagName",
    "nodeName",
    "children",
    "attributes",
    "shadowRoot",
];

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct Event {
    pub kind: String,
    pub target: Element,
    pub detail: Value,
    /// Bubbling events reach the document's listeners after the element's own.
    pub bubbles: bool,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("target", &self.target.tag_name())
            .field("detail", &self.detail)
            .finish()
    }
}

impl Event {
    pub fn new(kind: impl Into<String>, target: &Element) -> Self {
        Self {
            kind: kind.into(),
            target: target.clone(),
            detail: Value::Null,
            bubbles: true,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    /// The event as event scripts see it.
    pub fn to_value(&self) -> Value {
        json!({
            "type": self.kind,
            "detail": self.detail,
            "target": {"tagName": self.target.tag_name()},
        })
    }
}

pub type Listener = Rc<dyn Fn(&Event)>;

struct ListenerEntry {
    kind: String,
    listener: Listener,
    once: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS & STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Reflect values back into attributes.
    pub attr: bool,
    /// Render once the values are stored.
    pub render: bool,
    /// Store string values verbatim instead of parsing them.
    pub noparse: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            attr: true,
            render: true,
            noparse: false,
        }
    }
}

impl UpdateOptions {
    /// Store only: no reflection, no render.
    pub fn quiet() -> Self {
        Self {
            attr: false,
            render: false,
            noparse: false,
        }
    }

    pub fn attr(mut self, attr: bool) -> Self {
        self.attr = attr;
        self
    }

    pub fn render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    pub fn noparse(mut self, noparse: bool) -> Self {
        self.noparse = noparse;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Constructed,
    /// Attached, waiting for the definition's scripts.
    Connecting,
    Connected,
    Rendering,
    Disconnected,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ELEMENT
// ═══════════════════════════════════════════════════════════════════════════════

struct ElementInner {
    definition: Rc<Definition>,
    document: Document,
    attributes: RefCell<IndexMap<String, String>>,
    inner_html: RefCell<String>,
    properties: RefCell<IndexMap<String, PropertyDecl>>,
    data: RefCell<Map<String, Value>>,
    contents: RefCell<Option<Contents>>,
    /// camelCase accessor name → declared property name
    accessors: RefCell<IndexMap<String, String>>,
    listeners: RefCell<Vec<ListenerEntry>>,
    state: Cell<LifecycleState>,
    updating: Cell<bool>,
    observe_all: Cell<bool>,
    mutations: RefCell<IndexSet<String>>,
    events_attached: Cell<bool>,
    /// Bumped on every connect so a stale connect task can tell it was superseded.
    generation: Cell<u64>,
    ready_signal: RefCell<Option<oneshot::Sender<()>>>,
    ready: Shared<LocalBoxFuture<'static, bool>>,
}

#[derive(Clone)]
pub struct Element {
    inner: Rc<ElementInner>,
}

#[derive(Clone)]
pub(crate) struct WeakElement(Weak<ElementInner>);

impl WeakElement {
    pub(crate) fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(|inner| Element { inner })
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("tag", &self.tag_name())
            .field("state", &self.state())
            .field("attributes", &*self.inner.attributes.borrow())
            .finish()
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

fn single(name: impl Into<String>, value: Value) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert(name.into(), value);
    props
}

impl Element {
    pub(crate) fn new(definition: Rc<Definition>, document: Document) -> Self {
        let (ready_signal, receiver) = oneshot::channel::<()>();
        let properties = definition.properties().clone();
        Self {
            inner: Rc::new(ElementInner {
                definition,
                document,
                attributes: RefCell::new(IndexMap::new()),
                inner_html: RefCell::new(String::new()),
                properties: RefCell::new(properties),
                data: RefCell::new(Map::new()),
                contents: RefCell::new(None),
                accessors: RefCell::new(IndexMap::new()),
                listeners: RefCell::new(Vec::new()),
                state: Cell::new(LifecycleState::Constructed),
                updating: Cell::new(false),
                observe_all: Cell::new(false),
                mutations: RefCell::new(IndexSet::new()),
                events_attached: Cell::new(false),
                generation: Cell::new(0),
                ready_signal: RefCell::new(Some(ready_signal)),
                ready: receiver.map(|sent| sent.is_ok()).boxed_local().shared(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakElement {
        WeakElement(Rc::downgrade(&self.inner))
    }

    fn runtime(&self) -> &Rc<Runtime> {
        self.inner.definition.runtime()
    }

    pub fn tag_name(&self) -> &str {
        self.inner.definition.name()
    }

    pub fn definition(&self) -> &Rc<Definition> {
        &self.inner.definition
    }

    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Attributes & markup
    // ───────────────────────────────────────────────────────────────────────────

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.inner.attributes.borrow().get(name).cloned()
    }

    pub fn attributes(&self) -> Vec<(String, String)> {
        self.inner
            .attributes
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Set an attribute the way page script would. Declared properties update synchronously;
    /// parse failures propagate.
    pub fn set_attribute(&self, name: &str, value: &str) -> Result<()> {
        self.inner
            .attributes
            .borrow_mut()
            .insert(name.to_string(), value.to_string());
        self.attribute_changed(name, Value::String(value.to_string()))
    }

    pub fn remove_attribute(&self, name: &str) -> Result<()> {
        if self.inner.attributes.borrow_mut().shift_remove(name).is_none() {
            return Ok(());
        }
        self.attribute_changed(name, Value::Null)
    }

    /// Attributes present before connection, as a parser would create them: no notifications.
    pub(crate) fn init_attributes<'a>(&self, attributes: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let mut attrs = self.inner.attributes.borrow_mut();
        for (name, value) in attributes {
            attrs.insert(name.to_string(), value.to_string());
        }
    }

    fn attribute_changed(&self, name: &str, value: Value) -> Result<()> {
        if self.inner.observe_all.get() {
            self.queue_mutation(name);
        }
        if self.inner.definition.observes(name) {
            self.update(single(name, value), UpdateOptions::default().attr(false))?;
        }
        Ok(())
    }

    /// Reflection from inside an update. Not observed.
    fn write_attribute(&self, name: &str, value: String) {
        self.inner.attributes.borrow_mut().insert(name.to_string(), value);
    }

    fn queue_mutation(&self, name: &str) {
        let first = {
            let mut mutations = self.inner.mutations.borrow_mut();
            let first = mutations.is_empty();
            mutations.insert(name.to_string());
            first
        };
        if !first {
            return;
        }
        let weak = self.downgrade();
        let spawned = self.runtime().event_loop.spawn(async move {
            if let Some(element) = weak.upgrade() {
                element.deliver_mutations();
            }
        });
        if let Err(e) = spawned {
            error!(tag = %self.tag_name(), error = %e, "cannot schedule attribute delivery");
        }
    }

    /// A batch only updates when some mutated name is typed (`name:type`).
    fn deliver_mutations(&self) {
        let names: Vec<String> = self.inner.mutations.borrow_mut().drain(..).collect();
        if !names.iter().any(|name| name.contains(':')) {
            return;
        }
        let props: Map<String, Value> = {
            let attributes = self.inner.attributes.borrow();
            names
                .into_iter()
                .map(|name| {
                    let value = attributes.get(&name).cloned().map(Value::String).unwrap_or(Value::Null);
                    (name, value)
                })
                .collect()
        };
        trace!(tag = %self.tag_name(), count = props.len(), "delivering attribute mutations");
        if let Err(e) = self.update(props, UpdateOptions::default().attr(false)) {
            error!(tag = %self.tag_name(), error = %e, "attribute update failed");
        }
    }

    pub fn inner_html(&self) -> String {
        self.inner.inner_html.borrow().clone()
    }

    pub fn set_inner_html(&self, html: &str) {
        *self.inner.inner_html.borrow_mut() = html.to_string();
    }

    /// The light-DOM children captured on first connect.
    pub fn contents(&self) -> Option<Contents> {
        self.inner.contents.borrow().clone()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Data & properties
    // ───────────────────────────────────────────────────────────────────────────

    pub fn data(&self) -> Map<String, Value> {
        self.inner.data.borrow().clone()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.data.borrow().get(name).cloned()
    }

    /// This instance's property table: declared properties plus typed instance attributes.
    pub fn properties(&self) -> IndexMap<String, PropertyDecl> {
        self.inner.properties.borrow().clone()
    }

    /// Accessor names defined on connect.
    pub fn accessors(&self) -> Vec<String> {
        self.inner.accessors.borrow().keys().cloned().collect()
    }

    /// Read through an accessor. `None` if no accessor of that name exists.
    pub fn property(&self, name: &str) -> Option<Value> {
        if !self.inner.accessors.borrow().contains_key(name) {
            return None;
        }
        Some(self.get(name).unwrap_or(Value::Null))
    }

    /// Write through an accessor: a full update (reflect + render) of the declared property.
    /// Returns `false` if no accessor of that name exists.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<bool> {
        let declared = self.inner.accessors.borrow().get(name).cloned();
        let Some(declared) = declared else {
            return Ok(false);
        };
        self.update(single(declared, value.into()), UpdateOptions::default())?;
        Ok(true)
    }

    fn define_accessors(&self) {
        let names: Vec<String> = self.inner.properties.borrow().keys().cloned().collect();
        let mut accessors = self.inner.accessors.borrow_mut();
        for name in names {
            let property = camelize(&name);
            if BUILTIN_PROPERTIES.contains(&property.as_str()) {
                continue;
            }
            accessors.entry(property).or_insert(name);
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Update pipeline
    // ───────────────────────────────────────────────────────────────────────────

    /// Parse and store `props` (`name` or `name:type` keys), reflect them into attributes and
    /// re-render, as `options` asks.
    ///
    /// A call made while another update on this element is running is dropped. Before the first
    /// connect nothing is stored.
    pub fn update(&self, props: Map<String, Value>, options: UpdateOptions) -> Result<()> {
        if self.inner.updating.replace(true) {
            trace!(tag = %self.tag_name(), "dropping re-entrant update");
            return Ok(());
        }
        let result = self.apply_update(props, options);
        self.inner.updating.set(false);
        result
    }

    fn apply_update(&self, props: Map<String, Value>, options: UpdateOptions) -> Result<()> {
        if self.inner.contents.borrow().is_none() {
            return Ok(());
        }
        let runtime = self.runtime().clone();
        for (key, value) in props {
            let (name, explicit) = split_typed_name(&key);
            let type_name = match explicit {
                Some(type_name) => Some(type_name.to_string()),
                None => self
                    .inner
                    .properties
                    .borrow()
                    .get(name)
                    .and_then(|p| p.type_name.clone()),
            };
            let ty = runtime.types.get(type_name.as_deref());

            let raw = value.as_str().map(str::to_string);
            let parsed = match &raw {
                Some(raw) if !options.noparse => {
                    let data = self.inner.data.borrow();
                    let globals = runtime.globals.borrow();
                    let ctx = ParseContext {
                        name,
                        data: &data,
                        globals: &globals,
                        fetcher: &runtime.fetcher,
                        evaluator: runtime.evaluator.as_ref(),
                    };
                    ty.parse(raw, &ctx)?
                }
                _ => Parsed::Ready(value),
            };
            let value = match parsed {
                Parsed::Ready(value) => value,
                Parsed::Deferred(pending) => {
                    self.follow_up(name, pending)?;
                    Value::Null
                }
            };

            let serialized = match raw {
                Some(raw) => Some(raw),
                None if options.attr => ty.stringify(&value),
                None => None,
            };
            self.inner.data.borrow_mut().insert(camelize(name), value);
            if options.attr {
                if let Some(serialized) = serialized {
                    self.write_attribute(name, serialized);
                }
            }
        }
        if options.render && self.inner.definition.scripts_loaded() {
            self.render()?;
        }
        Ok(())
    }

    /// Once a deferred parse resolves, store its value verbatim and re-render.
    fn follow_up(&self, name: &str, pending: LocalBoxFuture<'static, Result<Value>>) -> Result<()> {
        let weak = self.downgrade();
        let name = name.to_string();
        self.runtime().event_loop.spawn(async move {
            let resolved = pending.await;
            let Some(element) = weak.upgrade() else {
                return;
            };
            match resolved {
                Ok(value) => {
                    let options = UpdateOptions::default().attr(false).noparse(true);
                    if let Err(e) = element.update(single(name.as_str(), value), options) {
                        error!(tag = %element.tag_name(), property = %name, error = %e, "deferred update failed");
                    }
                }
                Err(e) => error!(tag = %element.tag_name(), property = %name, error = %e, "deferred property failed"),
            }
        })
    }

    /// One render pass: `prerender`, template, render strategy, ready, `render`. On error the
    /// previous content stays.
    pub fn render(&self) -> Result<()> {
        let previous = self.state();
        self.inner.state.set(LifecycleState::Rendering);
        let result = self.render_pass();
        self.inner.state.set(match previous {
            LifecycleState::Disconnected => LifecycleState::Disconnected,
            _ => LifecycleState::Connected,
        });
        result
    }

    fn render_pass(&self) -> Result<()> {
        self.fire("prerender");
        let html = {
            let data = self.inner.data.borrow();
            let contents = self.inner.contents.borrow();
            self.inner.definition.render_html(&data, contents.as_ref())?
        };
        let render = self.inner.definition.renderer();
        render(self, &html);
        if let Some(signal) = self.inner.ready_signal.borrow_mut().take() {
            let _ = signal.send(());
        }
        self.fire("render");
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ───────────────────────────────────────────────────────────────────────────

    /// Attach to the document. The rest of the connection runs on the event loop once the
    /// definition's scripts have loaded.
    pub fn connect(&self) -> Result<()> {
        debug!(tag = %self.tag_name(), "connecting");
        self.inner.state.set(LifecycleState::Connecting);
        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);

        if self.inner.contents.borrow().is_none() {
            let contents = Contents::parse(&self.inner.inner_html.borrow())?;
            *self.inner.contents.borrow_mut() = Some(contents);
        }

        self.inner.definition.load_resources()?;
        let loaded = self.inner.definition.when_loaded();
        let weak = self.downgrade();
        self.runtime().event_loop.spawn(async move {
            loaded.await;
            let Some(element) = weak.upgrade() else {
                return;
            };
            if element.inner.generation.get() != generation || element.state() != LifecycleState::Connecting {
                trace!(tag = %element.tag_name(), "connect superseded");
                return;
            }
            if let Err(e) = element.finish_connect() {
                element.inner.state.set(LifecycleState::Connected);
                error!(tag = %element.tag_name(), error = %e, "connect failed");
            }
        })
    }

    fn finish_connect(&self) -> Result<()> {
        self.attach_event_scripts();
        self.fire("preconnect");

        let defaults: Vec<(String, Value)> = self
            .inner
            .properties
            .borrow()
            .iter()
            .map(|(name, decl)| (name.clone(), decl.value.clone()))
            .collect();
        for (name, value) in defaults {
            self.update(single(name, value), UpdateOptions::quiet())?;
        }

        let mut typed = false;
        for (key, raw) in self.attributes() {
            let (name, type_name) = split_typed_name(&key);
            if let Some(type_name) = type_name {
                self.inner
                    .properties
                    .borrow_mut()
                    .insert(name.to_string(), PropertyDecl::new(Some(type_name), raw.as_str()));
                typed = true;
            }
            let declared = self.inner.properties.borrow().contains_key(name);
            if declared {
                self.update(single(name, Value::String(raw)), UpdateOptions::quiet())?;
            }
        }

        self.define_accessors();
        if typed {
            self.inner.observe_all.set(true);
        }
        self.fire("connect");
        self.inner.state.set(LifecycleState::Connected);
        self.render()
    }

    pub fn disconnect(&self) {
        debug!(tag = %self.tag_name(), "disconnected");
        self.inner.state.set(LifecycleState::Disconnected);
        self.fire("disconnect");
    }

    /// Completes with `true` after the first successful render, or `false` if the element is
    /// dropped before rendering.
    pub fn ready(&self) -> Shared<LocalBoxFuture<'static, bool>> {
        self.inner.ready.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready_signal.borrow().is_none()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Events
    // ───────────────────────────────────────────────────────────────────────────

    pub fn add_event_listener(&self, kind: impl Into<String>, listener: impl Fn(&Event) + 'static) {
        self.listen(kind.into(), Rc::new(listener), false);
    }

    pub fn add_event_listener_once(&self, kind: impl Into<String>, listener: impl Fn(&Event) + 'static) {
        self.listen(kind.into(), Rc::new(listener), true);
    }

    fn listen(&self, kind: String, listener: Listener, once: bool) {
        self.inner
            .listeners
            .borrow_mut()
            .push(ListenerEntry { kind, listener, once });
    }

    pub fn dispatch(&self, event: Event) {
        trace!(tag = %self.tag_name(), event = %event.kind, "dispatch");
        let listeners: Vec<Listener> = {
            let mut entries = self.inner.listeners.borrow_mut();
            let matched = entries
                .iter()
                .filter(|entry| entry.kind == event.kind)
                .map(|entry| entry.listener.clone())
                .collect();
            entries.retain(|entry| !(entry.once && entry.kind == event.kind));
            matched
        };
        for listener in listeners {
            listener(&event);
        }
        if event.bubbles {
            self.inner.document.receive(&event);
        }
    }

    fn fire(&self, kind: &str) {
        self.dispatch(Event::new(kind, self));
    }

    fn attach_event_scripts(&self) {
        if self.inner.events_attached.replace(true) {
            return;
        }
        for script in self.inner.definition.event_scripts() {
            let weak = self.downgrade();
            let handler = script.clone();
            let listener: Listener = Rc::new(move |event: &Event| {
                let Some(element) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = element.run_event_script(&handler, event) {
                    error!(tag = %element.tag_name(), event = %event.kind, error = %e, "event script failed");
                }
            });
            self.listen(script.event.clone(), listener, script.once);
        }
    }

    /// Run an event script with the data context opened. Assignments write back into `data`
    /// without rendering; `update({...})` calls are applied once the script returns.
    fn run_event_script(&self, script: &EventScript, event: &Event) -> Result<()> {
        let runtime = self.runtime().clone();
        let data = self.data();
        let globals = runtime.globals.borrow().clone();
        let requests = UpdateRequests::default();
        let mut locals = Map::new();
        locals.insert(script.param.clone(), event.to_value());

        let scope = Scope::new(&data, &globals).with_functions(&requests);
        let outcome = runtime.evaluator.execute(&script.body, scope, locals)?;
        if let Some(data) = outcome.data {
            *self.inner.data.borrow_mut() = data;
        }
        for props in requests.0.take() {
            self.update(props, UpdateOptions::default())?;
        }
        Ok(())
    }
}

/// Collects `update({...})` calls made by an event script.
#[derive(Default)]
struct UpdateRequests(RefCell<Vec<Map<String, Value>>>);

impl Functions for UpdateRequests {
    fn call(&self, name: &str, args: &[Value], _: &Map<String, Value>) -> Option<Result<Value, ScriptError>> {
        if name != "update" {
            return None;
        }
        Some(match args.first() {
            Some(Value::Object(props)) => {
                self.0.borrow_mut().push(props.clone());
                Ok(Value::Null)
            }
            None => {
                self.0.borrow_mut().push(Map::new());
                Ok(Value::Null)
            }
            Some(_) => Err(ScriptError::Type("update() takes an object".to_string())),
        })
    }
}
