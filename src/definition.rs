//! A registered component: the prepared template, its resources, and how it renders.
//!
//! One [`Definition`] exists per component name per realm. Elements share it for everything
//! that is not per-instance: the extracted resources (loaded once, on the first connect), the
//! event and block scripts, the render strategy and the compiled-template cache.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::cache::TemplateCache;
use crate::component::{validate_name, ComponentConfig, PropertyDecl, RenderFn, RenderStrategy};
use crate::dom::Contents;
use crate::error::{ComponentError, Result, ScriptError, TemplateError};
use crate::factory::Runtime;
use crate::host::{ResourceLoader, Target};
use crate::preprocess::{prepare, serialize_attribute, substitute_slots, EventScript, Prepared};
use crate::script::{value, Functions};
use crate::template::{default_compiler, CompileFn, Render, RenderContext};

/// Nested block calls deeper than this fail the render.
const MAX_BLOCK_DEPTH: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE GATE
// ═══════════════════════════════════════════════════════════════════════════════

/// One-shot signal that every extracted script has loaded (or failed to).
struct ResourceGate {
    started: Cell<bool>,
    loaded: Rc<Cell<bool>>,
    signal: RefCell<Option<oneshot::Sender<()>>>,
    done: Shared<LocalBoxFuture<'static, ()>>,
}

impl ResourceGate {
    fn new() -> Self {
        let (signal, receiver) = oneshot::channel::<()>();
        Self {
            started: Cell::new(false),
            loaded: Rc::new(Cell::new(false)),
            signal: RefCell::new(Some(signal)),
            done: receiver.map(|_| ()).boxed_local().shared(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFINITION
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Definition {
    name: String,
    prepared: Prepared,
    properties: IndexMap<String, PropertyDecl>,
    renderer: RenderFn,
    compiler: CompileFn,
    cache: TemplateCache,
    blocks: RefCell<IndexMap<String, Rc<dyn Render>>>,
    gate: ResourceGate,
    loader: Rc<dyn ResourceLoader>,
    runtime: Rc<Runtime>,
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("events", &self.prepared.events.len())
            .field("blocks", &self.prepared.blocks.keys().collect::<Vec<_>>())
            .field("scripts_loaded", &self.gate.loaded.get())
            .finish()
    }
}

impl Definition {
    pub(crate) fn new(config: ComponentConfig, runtime: Rc<Runtime>, loader: Rc<dyn ResourceLoader>) -> Result<Self> {
        validate_name(&config.name)?;
        let prepared = prepare(&config.template)?;

        let mut properties = config.properties;
        properties.extend(prepared.properties.clone());

        let strategy = config
            .render
            .unwrap_or_else(|| RenderStrategy::Named(runtime.default_renderer.clone()));
        let renderer = match strategy {
            RenderStrategy::Custom(render) => render,
            RenderStrategy::Named(name) => match runtime.renderers.get(&name) {
                Some(render) => render,
                None => {
                    warn!(component = %config.name, renderer = %name, "unknown renderer, using replace");
                    runtime
                        .renderers
                        .get("replace")
                        .ok_or_else(|| ComponentError::Config("no replace renderer registered".into()))?
                }
            },
        };
        let compiler = config
            .compile
            .unwrap_or_else(|| default_compiler(runtime.settings.clone()));

        // Compile now so a bad template fails registration rather than the first render
        let cache = TemplateCache::new(runtime.cache_capacity);
        cache
            .get_or_compile(&prepared.template, &compiler)
            .map_err(|source| ComponentError::Compile {
                name: config.name.clone(),
                source,
            })?;

        debug!(
            component = %config.name,
            properties = properties.len(),
            head = prepared.head.len(),
            body = prepared.body.len(),
            "defined component"
        );
        Ok(Self {
            name: config.name,
            prepared,
            properties,
            renderer,
            compiler,
            cache,
            blocks: RefCell::new(IndexMap::new()),
            gate: ResourceGate::new(),
            loader,
            runtime,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared properties, JSON-script declarations included.
    pub fn properties(&self) -> &IndexMap<String, PropertyDecl> {
        &self.properties
    }

    /// Attribute names whose changes update an element synchronously.
    pub fn observes(&self, attribute: &str) -> bool {
        self.properties.contains_key(attribute)
    }

    /// The render template after extraction and directive expansion.
    pub fn template(&self) -> &str {
        &self.prepared.template
    }

    pub fn event_scripts(&self) -> &[EventScript] {
        &self.prepared.events
    }

    pub fn block_names(&self) -> Vec<&str> {
        self.prepared.blocks.keys().map(String::as_str).collect()
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    pub(crate) fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    pub(crate) fn renderer(&self) -> RenderFn {
        self.renderer.clone()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Resources
    // ───────────────────────────────────────────────────────────────────────────

    /// Start injecting the extracted resources. Only the first call does anything.
    ///
    /// Styles load independently. Scripts are injected in source order and an external script
    /// must settle before the next one is injected. Failures are logged and count as loaded.
    pub(crate) fn load_resources(&self) -> Result<()> {
        if self.gate.started.replace(true) {
            return Ok(());
        }
        debug!(component = %self.name, "loading resources");

        for resource in &self.prepared.head {
            let pending = self.loader.inject(Target::Head, resource);
            let name = self.name.clone();
            let watched = self.runtime.event_loop.spawn(async move {
                if let Err(e) = pending.await {
                    warn!(component = %name, error = %e, "stylesheet failed to load");
                }
            });
            if let Err(e) = watched {
                warn!(component = %self.name, error = %e, "stylesheet injected unwatched");
            }
        }

        let scripts = self.prepared.body.clone();
        let loader = self.loader.clone();
        let loaded = self.gate.loaded.clone();
        let signal = self.gate.signal.borrow_mut().take();
        let name = self.name.clone();
        let spawned = self.runtime.event_loop.spawn(async move {
            for script in scripts {
                let pending = loader.inject(Target::Body, &script);
                // Inline scripts run on insertion
                if !script.is_external_script() {
                    continue;
                }
                if let Err(e) = pending.await {
                    error!(component = %name, error = %e, "script failed to load");
                }
            }
            debug!(component = %name, "scripts loaded");
            loaded.set(true);
            if let Some(signal) = signal {
                // `done` holds the receiver for as long as the gate lives
                signal.send(()).ok();
            }
        });
        if let Err(e) = spawned {
            // The dropped task took the sender with it, so waiters still wake
            error!(component = %self.name, error = %e, "could not start loading scripts");
            self.gate.loaded.set(true);
            return Err(e);
        }
        Ok(())
    }

    pub fn scripts_loaded(&self) -> bool {
        self.gate.loaded.get()
    }

    /// Completes once every script has loaded.
    pub(crate) fn when_loaded(&self) -> Shared<LocalBoxFuture<'static, ()>> {
        self.gate.done.clone()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Rendering
    // ───────────────────────────────────────────────────────────────────────────

    /// Compile the slot-substituted template (cached) and render it against `data`.
    pub(crate) fn render_html(&self, data: &Map<String, Value>, contents: Option<&Contents>) -> Result<String> {
        let source = match contents {
            Some(contents) => substitute_slots(&self.prepared.template, contents),
            None => self.prepared.template.clone(),
        };
        let template = self
            .cache
            .get_or_compile(&source, &self.compiler)
            .map_err(|source| ComponentError::Compile {
                name: self.name.clone(),
                source,
            })?;
        let globals = self.runtime.globals.borrow();
        let functions = TemplateFunctions {
            definition: self,
            globals: &globals,
            depth: Cell::new(0),
        };
        let ctx = RenderContext {
            globals: &globals,
            functions: &functions,
        };
        Ok(template.render(data, ctx)?)
    }

    fn block(&self, name: &str, source: &str) -> Result<Rc<dyn Render>, ScriptError> {
        if let Some(block) = self.blocks.borrow().get(name) {
            return Ok(block.clone());
        }
        let block = (self.compiler)(source).map_err(|e| match e {
            TemplateError::Syntax(inner) => inner,
            other => ScriptError::Type(other.to_string()),
        })?;
        self.blocks.borrow_mut().insert(name.to_string(), block.clone());
        Ok(block)
    }
}

/// Functions a component template can call: the attribute helper and its block templates.
struct TemplateFunctions<'a> {
    definition: &'a Definition,
    globals: &'a Map<String, Value>,
    depth: Cell<usize>,
}

impl TemplateFunctions<'_> {
    /// A block renders against the caller's data overlaid with its argument object.
    fn render_block(&self, name: &str, source: &str, args: &[Value], data: &Map<String, Value>) -> Result<Value, ScriptError> {
        if self.depth.get() >= MAX_BLOCK_DEPTH {
            return Err(ScriptError::Type(format!("block {name} nested too deeply")));
        }
        let block = self.definition.block(name, source)?;
        let mut scope = data.clone();
        if let Some(Value::Object(extra)) = args.first() {
            scope.extend(extra.clone());
        }
        self.depth.set(self.depth.get() + 1);
        let rendered = block.render(
            &scope,
            RenderContext {
                globals: self.globals,
                functions: self,
            },
        );
        self.depth.set(self.depth.get() - 1);
        rendered.map(Value::String)
    }
}

impl Functions for TemplateFunctions<'_> {
    fn call(&self, name: &str, args: &[Value], data: &Map<String, Value>) -> Option<Result<Value, ScriptError>> {
        if name == "__attr" {
            let attribute = args.first().map(value::to_string).unwrap_or_default();
            let value = args.get(1).unwrap_or(&Value::Null);
            return Some(Ok(Value::String(serialize_attribute(&attribute, value))));
        }
        let source = self.definition.prepared.blocks.get(name)?;
        Some(self.render_block(name, source, args, data))
    }
}
