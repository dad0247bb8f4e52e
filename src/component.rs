//! Component configuration: what a registration carries before it becomes a definition.
//!
//! A configuration comes from three places: built directly in Rust, deserialized from JSON, or
//! read off a declarative `<template $name="x-card" title="Untitled" size:number="1">` element.
//! In the declarative form `$`-prefixed attributes configure the component and every other
//! attribute declares a property (`name` or `name:type`, the value being its default).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dom::Declaration;
use crate::element::Element;
use crate::error::{ComponentError, Result};
use crate::template::CompileFn;

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════════

/// A declared property: its type name and default value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyDecl {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl PropertyDecl {
    pub fn new(type_name: Option<&str>, value: impl Into<Value>) -> Self {
        Self {
            type_name: type_name.map(str::to_string),
            value: value.into(),
        }
    }
}

/// Split `name:type` into its parts. A missing or empty type is `None`.
pub fn split_typed_name(key: &str) -> (&str, Option<&str>) {
    match key.split_once(':') {
        Some((name, type_name)) if !type_name.is_empty() => (name, Some(type_name)),
        Some((name, _)) => (name, None),
        None => (key, None),
    }
}

/// `font-size` → `fontSize`
pub fn camelize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDER STRATEGIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Puts rendered markup into an element.
pub type RenderFn = Rc<dyn Fn(&Element, &str)>;

#[derive(Clone)]
pub enum RenderStrategy {
    /// Looked up in the [`RendererRegistry`] when the component is defined.
    Named(String),
    Custom(RenderFn),
}

impl fmt::Debug for RenderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderStrategy::Named(name) => f.debug_tuple("Named").field(name).finish(),
            RenderStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Renderer name → strategy. Seeded with `replace` and `none`, append-only.
pub struct RendererRegistry {
    renderers: RefCell<IndexMap<String, RenderFn>>,
}

impl fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.renderers.borrow().keys()).finish()
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        let mut renderers: IndexMap<String, RenderFn> = IndexMap::new();
        renderers.insert("replace".into(), Rc::new(|el: &Element, html: &str| el.set_inner_html(html)));
        renderers.insert("none".into(), Rc::new(|_: &Element, _: &str| {}));
        Self {
            renderers: RefCell::new(renderers),
        }
    }
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, render: RenderFn) -> Result<()> {
        let name = name.into();
        let mut renderers = self.renderers.borrow_mut();
        if renderers.contains_key(&name) {
            return Err(ComponentError::Duplicate { kind: "renderer", name });
        }
        renderers.insert(name, render);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<RenderFn> {
        self.renderers.borrow().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.renderers.borrow().keys().cloned().collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
pub struct ComponentConfig {
    pub name: String,
    pub template: String,
    pub properties: IndexMap<String, PropertyDecl>,
    /// `None` uses the factory's default renderer.
    pub render: Option<RenderStrategy>,
    /// Replaces the factory's template compiler for this component.
    pub compile: Option<CompileFn>,
}

impl fmt::Debug for ComponentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentConfig")
            .field("name", &self.name)
            .field("template", &self.template)
            .field("properties", &self.properties)
            .field("render", &self.render)
            .field("compile", &self.compile.as_ref().map(|_| ".."))
            .finish()
    }
}

impl ComponentConfig {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            ..Default::default()
        }
    }

    /// Declare a property, `key` being `name` or `name:type`.
    pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
        let (name, type_name) = split_typed_name(key);
        self.properties
            .insert(name.to_string(), PropertyDecl::new(type_name, value));
        self
    }

    pub fn render(mut self, render: RenderStrategy) -> Self {
        self.render = Some(render);
        self
    }

    pub fn compile(mut self, compile: CompileFn) -> Self {
        self.compile = Some(compile);
        self
    }

    /// Read a declarative `<template $name=…>` element.
    pub fn from_declaration(declaration: &Declaration) -> Result<Self> {
        let mut config = ComponentConfig {
            template: declaration.html.clone(),
            ..Default::default()
        };
        let mut named = false;
        for (key, value) in &declaration.attributes {
            match key.strip_prefix('$') {
                Some("name") => {
                    config.name = value.clone();
                    named = true;
                }
                Some("render") => config.render = Some(RenderStrategy::Named(value.clone())),
                Some(other) => debug!(option = other, "ignoring unknown declaration option"),
                None => {
                    let (name, type_name) = split_typed_name(key);
                    config
                        .properties
                        .insert(name.to_string(), PropertyDecl::new(type_name, value.as_str()));
                }
            }
        }
        if !named {
            return Err(ComponentError::MissingName);
        }
        Ok(config)
    }
}

/// Serializable component description, as found in a factory configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub properties: IndexMap<String, PropertyDecl>,
    #[serde(default)]
    pub render: Option<String>,
}

impl From<ComponentSpec> for ComponentConfig {
    fn from(spec: ComponentSpec) -> Self {
        ComponentConfig {
            name: spec.name,
            template: spec.template,
            properties: spec.properties,
            render: spec.render.map(RenderStrategy::Named),
            compile: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMES
// ═══════════════════════════════════════════════════════════════════════════════

const RESERVED_NAMES: &[&str] = &[
    "annotation-xml",
    "color-profile",
    "font-face",
    "font-face-src",
    "font-face-uri",
    "font-face-format",
    "font-face-name",
    "missing-glyph",
];

/// Custom element name rules: a lowercase letter first, at least one hyphen, no uppercase,
/// not reserved.
pub fn is_valid_name(name: &str) -> bool {
    if !name.contains('-') {
        return false;
    }
    if !name.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }
    if RESERVED_NAMES.contains(&name) {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
}

pub fn validate_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(ComponentError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_and_camelize() {
        assert_eq!(split_typed_name("count:number"), ("count", Some("number")));
        assert_eq!(split_typed_name("title"), ("title", None));
        assert_eq!(split_typed_name("title:"), ("title", None));
        assert_eq!(camelize("font-size"), "fontSize");
        assert_eq!(camelize("a-b-c"), "aBC");
        assert_eq!(camelize("plain"), "plain");
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("x-card"));
        assert!(is_valid_name("my-el2.v1"));
        assert!(!is_valid_name("card"));
        assert!(!is_valid_name("X-card"));
        assert!(!is_valid_name("x-Card"));
        assert!(!is_valid_name("1-card"));
        assert!(!is_valid_name("font-face"));
        assert!(matches!(validate_name("nope"), Err(ComponentError::InvalidName(_))));
    }

    #[test]
    fn test_from_declaration() {
        let declaration = Declaration {
            attributes: vec![
                ("$name".into(), "x-card".into()),
                ("$render".into(), "none".into()),
                ("title".into(), "Untitled".into()),
                ("size:number".into(), "2".into()),
            ],
            html: "<h1><%= title %></h1>".into(),
        };
        let config = ComponentConfig::from_declaration(&declaration).unwrap();
        assert_eq!(config.name, "x-card");
        assert!(matches!(config.render, Some(RenderStrategy::Named(ref n)) if n == "none"));
        assert_eq!(config.properties["title"], PropertyDecl::new(None, "Untitled"));
        assert_eq!(config.properties["size"], PropertyDecl::new(Some("number"), "2"));
    }

    #[test]
    fn test_declaration_without_name() {
        let declaration = Declaration {
            attributes: vec![("title".into(), "x".into())],
            html: String::new(),
        };
        assert!(matches!(
            ComponentConfig::from_declaration(&declaration),
            Err(ComponentError::MissingName)
        ));
    }

    #[test]
    fn test_spec_deserializes() {
        let spec: ComponentSpec = serde_json::from_value(json!({
            "name": "x-tag",
            "template": "<b><%= label %></b>",
            "properties": {"label": {"value": "hi"}, "n": {"type": "number", "value": "1"}},
            "render": "none"
        }))
        .unwrap();
        let config = ComponentConfig::from(spec);
        assert_eq!(config.properties["n"].type_name.as_deref(), Some("number"));
        assert_eq!(config.properties["label"].value, json!("hi"));
        assert!(matches!(config.render, Some(RenderStrategy::Named(ref n)) if n == "none"));
    }

    #[test]
    fn test_renderer_registry() {
        let registry = RendererRegistry::new();
        assert_eq!(registry.names(), vec!["replace", "none"]);
        assert!(registry.get("none").is_some());
        assert!(registry
            .register("none", Rc::new(|_: &Element, _: &str| {}))
            .is_err());
    }
}
