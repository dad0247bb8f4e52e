//! Attribute types: how an attribute's string converts to the value templates render against,
//! and back.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{ComponentError, Result};
use crate::host::Fetch;
use crate::script::{self, value, Evaluate, Scope};

/// Outcome of [`AttributeType::parse`].
pub enum Parsed {
    Ready(Value),
    /// Resolved later on the event loop; the element stores `null` until then.
    Deferred(LocalBoxFuture<'static, Result<Value>>),
}

impl fmt::Debug for Parsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parsed::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Parsed::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// What a parse may consult besides the raw string.
pub struct ParseContext<'a> {
    /// Property name being parsed.
    pub name: &'a str,
    /// The element's current data.
    pub data: &'a Map<String, Value>,
    pub globals: &'a Map<String, Value>,
    pub fetcher: &'a Rc<dyn Fetch>,
    pub evaluator: &'a dyn Evaluate,
}

pub trait AttributeType {
    fn parse(&self, raw: &str, ctx: &ParseContext<'_>) -> Result<Parsed>;

    /// String form for reflection into an attribute. `None` means the type cannot serialize,
    /// and a non-string value of this type is never written back.
    fn stringify(&self, value: &Value) -> Option<String>;
}

fn parse_error(ctx: &ParseContext<'_>, type_name: &str, raw: &str, reason: impl fmt::Display) -> ComponentError {
    ComponentError::Parse {
        name: ctx.name.to_string(),
        type_name: type_name.to_string(),
        raw: raw.to_string(),
        reason: reason.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILT-IN TYPES
// ═══════════════════════════════════════════════════════════════════════════════

pub struct StringType;

impl AttributeType for StringType {
    fn parse(&self, raw: &str, _: &ParseContext<'_>) -> Result<Parsed> {
        Ok(Parsed::Ready(Value::String(raw.to_string())))
    }

    fn stringify(&self, value: &Value) -> Option<String> {
        Some(value::to_string(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl JsonKind {
    fn name(self) -> &'static str {
        match self {
            JsonKind::Number => "number",
            JsonKind::Boolean => "boolean",
            JsonKind::Array => "array",
            JsonKind::Object => "object",
            JsonKind::Any => "json",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (JsonKind::Any, _) | (_, Value::Null) => true,
            (JsonKind::Number, Value::Number(_)) => true,
            (JsonKind::Boolean, Value::Bool(_)) => true,
            (JsonKind::Array, Value::Array(_)) => true,
            (JsonKind::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// Strict structured decode. Empty input parses to the empty string.
pub struct JsonType(pub JsonKind);

impl AttributeType for JsonType {
    fn parse(&self, raw: &str, ctx: &ParseContext<'_>) -> Result<Parsed> {
        if raw.trim().is_empty() {
            return Ok(Parsed::Ready(Value::String(String::new())));
        }
        let kind = self.0;
        let parsed: Value =
            serde_json::from_str(raw.trim()).map_err(|e| parse_error(ctx, kind.name(), raw, e))?;
        if !kind.accepts(&parsed) {
            return Err(parse_error(
                ctx,
                kind.name(),
                raw,
                format!("expected {}, got {}", kind.name(), value::type_of(&parsed)),
            ));
        }
        Ok(Parsed::Ready(parsed))
    }

    fn stringify(&self, value: &Value) -> Option<String> {
        script::json_stringify(value, None)
    }
}

/// Evaluates the attribute as an expression over the element's data. The attribute's own name
/// resolves to the global of that name, so `rules:js="rules"` reads `window.rules` rather than
/// the declared default.
pub struct JsType;

impl AttributeType for JsType {
    fn parse(&self, raw: &str, ctx: &ParseContext<'_>) -> Result<Parsed> {
        if raw.trim().is_empty() {
            return Ok(Parsed::Ready(Value::String(String::new())));
        }
        let scope = Scope::new(ctx.data, ctx.globals).shadowing(ctx.name);
        ctx.evaluator
            .evaluate(raw, scope)
            .map(Parsed::Ready)
            .map_err(|e| parse_error(ctx, "js", raw, e))
    }

    fn stringify(&self, value: &Value) -> Option<String> {
        script::json_stringify(value, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlMode {
    /// `{url, status, ok, text}`
    Response,
    Json,
    Text,
}

/// Fetches the address. Values of these types are never reflected back into attributes.
pub struct UrlType(pub UrlMode);

impl AttributeType for UrlType {
    fn parse(&self, raw: &str, ctx: &ParseContext<'_>) -> Result<Parsed> {
        if raw.is_empty() {
            return Ok(Parsed::Ready(Value::String(String::new())));
        }
        let request = ctx.fetcher.fetch(raw);
        let mode = self.0;
        Ok(Parsed::Deferred(
            async move {
                let response = request.await?;
                Ok(match mode {
                    UrlMode::Response => response.to_value(),
                    UrlMode::Json => response.json()?,
                    UrlMode::Text => Value::String(response.text),
                })
            }
            .boxed_local(),
        ))
    }

    fn stringify(&self, _: &Value) -> Option<String> {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Type name → converter. Seeded with the built-ins, append-only.
pub struct TypeRegistry {
    types: RefCell<IndexMap<String, Rc<dyn AttributeType>>>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.types.borrow().keys()).finish()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        let mut types: IndexMap<String, Rc<dyn AttributeType>> = IndexMap::new();
        types.insert("string".into(), Rc::new(StringType));
        types.insert("number".into(), Rc::new(JsonType(JsonKind::Number)));
        types.insert("boolean".into(), Rc::new(JsonType(JsonKind::Boolean)));
        types.insert("array".into(), Rc::new(JsonType(JsonKind::Array)));
        types.insert("object".into(), Rc::new(JsonType(JsonKind::Object)));
        types.insert("json".into(), Rc::new(JsonType(JsonKind::Any)));
        types.insert("js".into(), Rc::new(JsType));
        types.insert("url".into(), Rc::new(UrlType(UrlMode::Response)));
        types.insert("urljson".into(), Rc::new(UrlType(UrlMode::Json)));
        types.insert("urltext".into(), Rc::new(UrlType(UrlMode::Text)));
        Self {
            types: RefCell::new(types),
        }
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, ty: Rc<dyn AttributeType>) -> Result<()> {
        let name = name.into();
        let mut types = self.types.borrow_mut();
        if types.contains_key(&name) {
            return Err(ComponentError::Duplicate { kind: "type", name });
        }
        types.insert(name, ty);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.borrow().contains_key(name)
    }

    /// The converter for `name`, falling back to `string`.
    pub fn get(&self, name: Option<&str>) -> Rc<dyn AttributeType> {
        let types = self.types.borrow();
        name.and_then(|n| types.get(n))
            .or_else(|| types.get("string"))
            .cloned()
            .unwrap_or_else(|| Rc::new(StringType))
    }

    pub fn names(&self) -> Vec<String> {
        self.types.borrow().keys().cloned().collect()
    }
}
