//! The registration surface.
//!
//! [`UiFactory`] owns everything process-wide: the event loop, the type and renderer
//! registries, the global table, the fetch capability and the expression evaluator. Components
//! are defined on a [`Realm`] (a window: its own document and component registry). The factory
//! has a default realm and can create more that share its registries.

use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::component::{validate_name, ComponentConfig, ComponentSpec, RendererRegistry, RenderStrategy};
use crate::config::FactoryConfig;
use crate::definition::Definition;
use crate::discovery::find_template_files;
use crate::dom::{find_declarations, first_element, Declaration};
use crate::element::Element;
use crate::error::{ComponentError, Result};
use crate::host::{Document, DocumentLoader, EventLoop, Fetch, FileFetcher, MemoryFetcher, ResourceLoader};
use crate::script::{Evaluate, SandboxEvaluator};
use crate::template::{compile, Template, TemplateSettings};
use crate::types::TypeRegistry;

lazy_static! {
    static ref IMPORT_SEPARATOR: Regex = Regex::new(r"[,+\s]+").unwrap();
    static ref HTML_SUFFIX: Regex = Regex::new(r"(?i)\.html$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

/// Services shared by every realm, definition and element of one factory.
pub(crate) struct Runtime {
    pub event_loop: EventLoop,
    pub types: Rc<TypeRegistry>,
    pub renderers: Rc<RendererRegistry>,
    pub globals: RefCell<Map<String, Value>>,
    pub fetcher: Rc<dyn Fetch>,
    pub evaluator: Rc<dyn Evaluate>,
    pub settings: TemplateSettings,
    pub default_renderer: String,
    pub cache_capacity: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REALM
// ═══════════════════════════════════════════════════════════════════════════════

struct RealmInner {
    name: String,
    document: Document,
    loader: Rc<dyn ResourceLoader>,
    registry: RefCell<IndexMap<String, Rc<Definition>>>,
    runtime: Rc<Runtime>,
}

/// A window: one document and one write-once component registry.
#[derive(Clone)]
pub struct Realm {
    inner: Rc<RealmInner>,
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("name", &self.inner.name)
            .field("components", &self.names())
            .finish()
    }
}

impl PartialEq for Realm {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Realm {
    fn new(name: &str, runtime: Rc<Runtime>, document: Document, loader: Rc<dyn ResourceLoader>) -> Self {
        Self {
            inner: Rc::new(RealmInner {
                name: name.to_string(),
                document,
                loader,
                registry: RefCell::new(IndexMap::new()),
                runtime,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn document(&self) -> &Document {
        &self.inner.document
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.inner.registry.borrow().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Rc<Definition>> {
        self.inner.registry.borrow().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.registry.borrow().keys().cloned().collect()
    }

    /// Define a component. An existing name is left alone: logged, `Ok(false)`.
    fn define(&self, config: ComponentConfig) -> Result<bool> {
        if self.is_defined(&config.name) {
            warn!(component = %config.name, realm = %self.inner.name, "Can't redefine component");
            return Ok(false);
        }
        let name = config.name.clone();
        let definition = Definition::new(config, self.inner.runtime.clone(), self.inner.loader.clone())?;
        self.inner
            .registry
            .borrow_mut()
            .insert(name, Rc::new(definition));
        Ok(true)
    }

    pub fn create_element(&self, tag: &str) -> Result<Element> {
        let definition = self
            .get(tag)
            .ok_or_else(|| ComponentError::UndefinedElement(tag.to_string()))?;
        Ok(Element::new(definition, self.inner.document.clone()))
    }

    /// An element with attributes and light-DOM children, as if parsed from markup.
    pub fn create_element_with(&self, tag: &str, attributes: &[(&str, &str)], inner_html: &str) -> Result<Element> {
        let element = self.create_element(tag)?;
        element.init_attributes(attributes.iter().copied());
        element.set_inner_html(inner_html);
        Ok(element)
    }

    /// Build an element from the first element in `html`.
    pub fn parse_element(&self, html: &str) -> Result<Element> {
        let (tag, attributes, inner_html) =
            first_element(html)?.ok_or_else(|| ComponentError::UndefinedElement(html.trim().to_string()))?;
        let element = self.create_element(&tag)?;
        element.init_attributes(attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        element.set_inner_html(&inner_html);
        Ok(element)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRATION
// ═══════════════════════════════════════════════════════════════════════════════

/// What to register.
#[derive(Debug, Clone)]
pub enum Source {
    Config(ComponentConfig),
    /// Fetched and registered on the event loop.
    Url(String),
    Element(Declaration),
    /// Every `<template $name>` in this markup.
    Document(String),
}

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Realm to define on instead of the factory's default one.
    pub window: Option<Realm>,
    /// Overrides the component's own render strategy.
    pub render: Option<RenderStrategy>,
}

impl RegisterOptions {
    pub fn window(realm: &Realm) -> Self {
        Self {
            window: Some(realm.clone()),
            render: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FACTORY
// ═══════════════════════════════════════════════════════════════════════════════

type LoaderFactory = Rc<dyn Fn(&Document) -> Rc<dyn ResourceLoader>>;

struct FactoryInner {
    runtime: Rc<Runtime>,
    realm: Realm,
    loader_for: Option<LoaderFactory>,
    realms: RefCell<Vec<Realm>>,
    components: RefCell<IndexMap<String, ComponentConfig>>,
    config: FactoryConfig,
}

/// Cheap-clone handle to one component factory.
#[derive(Clone)]
pub struct UiFactory {
    inner: Rc<FactoryInner>,
}

impl fmt::Debug for UiFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiFactory")
            .field("realm", &self.inner.realm)
            .field("types", &self.inner.runtime.types)
            .field("renderers", &self.inner.runtime.renderers)
            .finish()
    }
}

impl Default for UiFactory {
    fn default() -> Self {
        UiFactoryBuilder::default().assemble().0
    }
}

#[derive(Default)]
pub struct UiFactoryBuilder {
    config: FactoryConfig,
    types: Option<Rc<TypeRegistry>>,
    renderers: Option<Rc<RendererRegistry>>,
    fetcher: Option<Rc<dyn Fetch>>,
    evaluator: Option<Rc<dyn Evaluate>>,
    loader_for: Option<LoaderFactory>,
}

impl UiFactoryBuilder {
    pub fn config(mut self, config: FactoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn types(mut self, types: Rc<TypeRegistry>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn renderers(mut self, renderers: Rc<RendererRegistry>) -> Self {
        self.renderers = Some(renderers);
        self
    }

    pub fn fetcher(mut self, fetcher: Rc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn evaluator(mut self, evaluator: Rc<dyn Evaluate>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// How each realm injects resources into its document. Defaults to a [`DocumentLoader`]
    /// that fetches external sources.
    pub fn loader(mut self, loader_for: impl Fn(&Document) -> Rc<dyn ResourceLoader> + 'static) -> Self {
        self.loader_for = Some(Rc::new(loader_for));
        self
    }

    /// Build the factory and register the configured components.
    pub fn build(self) -> Result<UiFactory> {
        let (factory, components) = self.assemble();
        for spec in components {
            factory.register_component(spec.into(), RegisterOptions::default())?;
        }
        Ok(factory)
    }

    fn assemble(mut self) -> (UiFactory, Vec<ComponentSpec>) {
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => match std::env::current_dir()
                .map_err(ComponentError::from)
                .and_then(|dir| FileFetcher::from_dir(dir))
            {
                Ok(fetcher) => Rc::new(fetcher) as Rc<dyn Fetch>,
                Err(e) => {
                    debug!(error = %e, "no working directory, using an empty memory fetcher");
                    Rc::new(MemoryFetcher::new())
                }
            },
        };
        let runtime = Rc::new(Runtime {
            event_loop: EventLoop::new(),
            types: self.types.unwrap_or_default(),
            renderers: self.renderers.unwrap_or_default(),
            globals: RefCell::new(self.config.globals.clone()),
            fetcher,
            evaluator: self.evaluator.unwrap_or_else(|| Rc::new(SandboxEvaluator)),
            settings: self.config.template.clone(),
            default_renderer: self.config.default_renderer.clone(),
            cache_capacity: self.config.cache_capacity,
        });
        let document = Document::new();
        let loader = make_loader(self.loader_for.as_ref(), &document, &runtime);
        let realm = Realm::new("window", runtime.clone(), document, loader);
        let components = std::mem::take(&mut self.config.components);
        let factory = UiFactory {
            inner: Rc::new(FactoryInner {
                runtime,
                realm,
                loader_for: self.loader_for,
                realms: RefCell::new(Vec::new()),
                components: RefCell::new(IndexMap::new()),
                config: self.config,
            }),
        };
        (factory, components)
    }
}

fn make_loader(loader_for: Option<&LoaderFactory>, document: &Document, runtime: &Runtime) -> Rc<dyn ResourceLoader> {
    match loader_for {
        Some(make) => make(document),
        None => Rc::new(DocumentLoader::new(document.clone()).with_fetcher(runtime.fetcher.clone())),
    }
}

/// `@name` → `name.html` next to the hosting script.
fn resolve_relative(address: &str, script_src: &str) -> String {
    let file = format!("{}.html", HTML_SUFFIX.replace(address, ""));
    match script_src.rfind('/') {
        Some(slash) => format!("{}{}", &script_src[..=slash], file),
        None => file,
    }
}

impl UiFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> UiFactoryBuilder {
        UiFactoryBuilder::default()
    }

    pub fn with_config(config: FactoryConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.inner.config
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Shared services
    // ───────────────────────────────────────────────────────────────────────────

    pub fn types(&self) -> &TypeRegistry {
        &self.inner.runtime.types
    }

    pub fn renderers(&self) -> &RendererRegistry {
        &self.inner.runtime.renderers
    }

    pub fn fetcher(&self) -> Rc<dyn Fetch> {
        self.inner.runtime.fetcher.clone()
    }

    pub fn set_global(&self, name: impl Into<String>, value: Value) {
        self.inner.runtime.globals.borrow_mut().insert(name.into(), value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.inner.runtime.globals.borrow().get(name).cloned()
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.runtime.event_loop
    }

    /// Run queued work (resource loads, deferred parses, imports) until nothing can progress.
    pub fn run_until_stalled(&self) -> bool {
        self.inner.runtime.event_loop.run_until_stalled()
    }

    pub fn block_on<T>(&self, fut: impl std::future::Future<Output = T>) -> Option<T> {
        self.inner.runtime.event_loop.block_on(fut)
    }

    /// Compile a template with the factory's settings.
    pub fn template(&self, text: &str) -> Result<Template> {
        Ok(compile(text, &self.inner.runtime.settings)?)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Realms
    // ───────────────────────────────────────────────────────────────────────────

    pub fn realm(&self) -> &Realm {
        &self.inner.realm
    }

    /// A new window with its own document and registry, sharing this factory's services.
    pub fn create_realm(&self, name: &str) -> Realm {
        let document = Document::new();
        let loader = make_loader(self.inner.loader_for.as_ref(), &document, &self.inner.runtime);
        let realm = Realm::new(name, self.inner.runtime.clone(), document, loader);
        self.inner.realms.borrow_mut().push(realm.clone());
        realm
    }

    pub fn realms(&self) -> Vec<Realm> {
        let mut realms = vec![self.inner.realm.clone()];
        realms.extend(self.inner.realms.borrow().iter().cloned());
        realms
    }

    pub fn create_element(&self, tag: &str) -> Result<Element> {
        self.inner.realm.create_element(tag)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Registration
    // ───────────────────────────────────────────────────────────────────────────

    /// Names of every component registered through this factory, in registration order.
    pub fn components(&self) -> Vec<String> {
        self.inner.components.borrow().keys().cloned().collect()
    }

    pub fn component(&self, name: &str) -> Option<ComponentConfig> {
        self.inner.components.borrow().get(name).cloned()
    }

    pub fn register(&self, source: Source, options: RegisterOptions) -> Result<()> {
        match source {
            Source::Config(config) => self.register_component(config, options).map(|_| ()),
            Source::Element(declaration) => self.register_element(&declaration, options).map(|_| ()),
            Source::Document(html) => self.register_document(&html, options).map(|_| ()),
            Source::Url(url) => self.register_url(&url, options),
        }
    }

    /// Define a component. Returns `false` when the name is already defined on the target
    /// realm; the existing definition stays.
    pub fn register_component(&self, mut config: ComponentConfig, options: RegisterOptions) -> Result<bool> {
        if let Some(render) = options.render {
            config.render = Some(render);
        }
        validate_name(&config.name)?;
        let realm = options.window.unwrap_or_else(|| self.inner.realm.clone());
        if !realm.define(config.clone())? {
            return Ok(false);
        }
        debug!(component = %config.name, realm = %realm.name(), "registered");
        self.inner
            .components
            .borrow_mut()
            .insert(config.name.clone(), config);
        Ok(true)
    }

    pub fn register_element(&self, declaration: &Declaration, options: RegisterOptions) -> Result<bool> {
        let config = ComponentConfig::from_declaration(declaration)?;
        self.register_component(config, options)
    }

    /// Register every `<template $name>` in `html`. A declaration that fails is logged and
    /// skipped. Returns how many components were newly defined.
    pub fn register_document(&self, html: &str, options: RegisterOptions) -> Result<usize> {
        let mut registered = 0;
        for declaration in find_declarations(html)? {
            match self.register_element(&declaration, options.clone()) {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(e) => error!(component = ?declaration.name(), error = %e, "registration failed"),
            }
        }
        Ok(registered)
    }

    /// Where an import address points. `@name` resolves next to the hosting script.
    pub fn resolve_import(&self, address: &str, script_src: Option<&str>) -> Result<String> {
        let Some(name) = address.strip_prefix('@') else {
            return Ok(address.to_string());
        };
        let script_src = script_src
            .or(self.inner.config.script_src.as_deref())
            .ok_or_else(|| ComponentError::Config(format!("{address}: no script address to resolve against")))?;
        Ok(resolve_relative(name, script_src))
    }

    /// Fetch a document and register its templates.
    pub fn import(&self, url: &str, options: RegisterOptions) -> LocalBoxFuture<'static, Result<usize>> {
        let url = match self.resolve_import(url, None) {
            Ok(url) => url,
            Err(e) => return future::ready(Err(e)).boxed_local(),
        };
        let request = self.inner.runtime.fetcher.fetch(&url);
        let factory = self.clone();
        async move {
            let response = request.await?.error_for_status()?;
            let registered = factory.register_document(&response.text, options)?;
            debug!(%url, registered, "imported");
            Ok(registered)
        }
        .boxed_local()
    }

    /// [`import`](Self::import) on the event loop. Failures are logged.
    pub fn register_url(&self, url: &str, options: RegisterOptions) -> Result<()> {
        let pending = self.import(url, options);
        let url = url.to_string();
        self.inner.runtime.event_loop.spawn(async move {
            if let Err(e) = pending.await {
                error!(%url, error = %e, "import failed");
            }
        })
    }

    fn import_addresses(import: &str) -> Vec<&str> {
        IMPORT_SEPARATOR
            .split(import.trim())
            .filter(|address| !address.is_empty())
            .collect()
    }

    /// Queue an import of every address in a comma / space / `+` separated list. Addresses
    /// that cannot be resolved or queued are logged and skipped. Returns how many were queued.
    pub fn auto_import(&self, script_src: Option<&str>, import: &str) -> usize {
        let mut queued = 0;
        for address in Self::import_addresses(import) {
            let url = match self.resolve_import(address, script_src) {
                Ok(url) => url,
                Err(e) => {
                    warn!(%address, error = %e, "import skipped");
                    continue;
                }
            };
            match self.register_url(&url, RegisterOptions::default()) {
                Ok(()) => queued += 1,
                Err(e) => warn!(%url, error = %e, "import not queued"),
            }
        }
        queued
    }

    /// Import every listed address concurrently, then register the page's own templates.
    /// Import failures are logged and do not stop the rest.
    pub fn boot(&self, script_src: Option<&str>, import: &str, document_html: &str) -> LocalBoxFuture<'static, Result<usize>> {
        let mut imports = Vec::new();
        for address in Self::import_addresses(import) {
            match self.resolve_import(address, script_src) {
                Ok(url) => imports.push((url.clone(), self.import(&url, RegisterOptions::default()))),
                Err(e) => warn!(%address, error = %e, "import skipped"),
            }
        }
        let factory = self.clone();
        let html = document_html.to_string();
        async move {
            let (urls, pending): (Vec<String>, Vec<_>) = imports.into_iter().unzip();
            let mut registered = 0;
            for (url, result) in urls.iter().zip(future::join_all(pending).await) {
                match result {
                    Ok(count) => registered += count,
                    Err(e) => error!(%url, error = %e, "import failed"),
                }
            }
            Ok(registered + factory.register_document(&html, RegisterOptions::default())?)
        }
        .boxed_local()
    }

    /// [`boot`](Self::boot) with the configured script address and import list.
    pub fn boot_from_config(&self, document_html: &str) -> LocalBoxFuture<'static, Result<usize>> {
        let script_src = self.inner.config.script_src.clone();
        let import = self.inner.config.import.clone();
        self.boot(script_src.as_deref(), &import, document_html)
    }

    /// Register the templates of every `*.html` file under `dir`.
    pub fn register_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let mut registered = 0;
        for path in find_template_files(dir.as_ref())? {
            let html = std::fs::read_to_string(&path)?;
            let count = self.register_document(&html, RegisterOptions::default())?;
            debug!(path = %path.display(), count, "registered file");
            registered += count;
        }
        Ok(registered)
    }
}
