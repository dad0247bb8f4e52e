//! # uifactory
//!
//! Declarative custom-element factory. A component is declared as a template:
//!
//! ```html
//! <template $name="x-greet" who="world" count:number="1">
//!   <style>p { color: red }</style>
//!   <p class:="{loud: count > 2}">Hello <%= who %> <slot name="suffix">!</slot></p>
//!   <script onrender>rendered = true</script>
//! </template>
//! ```
//!
//! ## Pipeline
//!
//! 1. **Preprocess** (`preprocess`): lift out styles and scripts, collect event scripts, block
//!    templates and JSON property declarations, expand `name:="expr"` directives.
//! 2. **Compile** (`template`): turn the template into a render function over a data mapping,
//!    with escape (`<%- %>`), interpolate (`<%= %>`, `${}`) and evaluate (`<% %>`) delimiters.
//! 3. **Define** (`definition`): bind the render function, the type registry and the declared
//!    properties into a component on a realm.
//! 4. **Run** (`element`): instances parse typed attributes into `data`, reflect properties back
//!    into attributes, and re-render through the update pipeline.
//!
//! ## Lifecycle notifications
//!
//! `preconnect`, `connect`, `prerender`, `render`, `disconnect`, bubbling to the realm's
//! document.
//!
//! ## Execution model
//!
//! Single-threaded and cooperative. Resource loading, deferred (`url*`) parses, batched attribute
//! mutations and imports are tasks on the factory's event loop; nothing progresses until the
//! embedder drives it with [`UiFactory::run_until_stalled`] or [`UiFactory::block_on`].

mod cache;
mod component;
mod config;
mod definition;
mod discovery;
mod dom;
mod element;
mod error;
mod escape;
mod factory;
mod host;
mod preprocess;
pub mod script;
mod template;
mod types;

#[cfg(test)]
mod lifecycle_tests;

pub use cache::TemplateCache;
pub use component::{
    camelize, is_valid_name, split_typed_name, ComponentConfig, ComponentSpec, PropertyDecl, RenderFn,
    RenderStrategy, RendererRegistry,
};
pub use config::FactoryConfig;
pub use definition::Definition;
pub use discovery::find_template_files;
pub use dom::{find_declarations, Contents, Declaration};
pub use element::{Element, Event, LifecycleState, Listener, UpdateOptions};
pub use error::{ComponentError, FetchError, ResourceLoadError, Result, ScriptError, TemplateError};
pub use escape::{escape, unescape};
pub use factory::{Realm, RegisterOptions, Source, UiFactory, UiFactoryBuilder};
pub use host::{
    Document, DocumentLoader, EventLoop, Fetch, FileFetcher, MemoryFetcher, Resource, ResourceLoader, Response,
    Target,
};
pub use preprocess::{expand_directives, prepare, serialize_attribute, substitute_slots, EventScript, Prepared};
pub use script::{Evaluate, Functions, SandboxEvaluator, Scope};
pub use template::{compile, default_compiler, CompileFn, Render, RenderContext, Template, TemplateSettings};
pub use types::{AttributeType, JsonKind, JsonType, JsType, ParseContext, Parsed, StringType, TypeRegistry, UrlMode, UrlType};
