//! Micro-template compiler.
//!
//! `compile` turns a string with `<%- escape %>`, `<%= interpolate %>` / `${interpolate}` and
//! `<% evaluate %>` delimiters into a reusable [`Template`]. The generated program follows the
//! classic shape: literal text is appended to an accumulator `__p`, escaped values go through
//! `__e(...)`, interpolations through `((__t = (...)) == null ? '' : __t)`, and evaluate blocks
//! are spliced in verbatim. That program is then parsed by the sandboxed expression language.

use std::fmt;
use std::rc::Rc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ScriptError, TemplateError};
use crate::script::{Functions, NoFunctions, Program, Scope};

pub const ESCAPE_PATTERN: &str = r"<%-([\s\S]+?)%>";
pub const INTERPOLATE_PATTERN: &str = r"<%=([\s\S]+?)%>";
pub const EVALUATE_PATTERN: &str = r"<%([\s\S]+?)%>";
/// `${expr}`, active only while the interpolate pattern is the default one.
pub const ES_TEMPLATE_PATTERN: &str = r"\$\{([^\\}]*(?:\\.[^\\}]*)*)\}";

lazy_static! {
    static ref UNESCAPED_STRING: Regex = Regex::new(r"['\n\r\u{2028}\u{2029}\\]").unwrap();
    static ref FORBIDDEN_IDENTIFIER_CHARS: Regex = Regex::new(r"[()=,{}\[\]/\s]").unwrap();
    static ref EMPTY_STRING_LEADING: Regex = Regex::new(r"\b__p \+= '';").unwrap();
    static ref EMPTY_STRING_MIDDLE: Regex = Regex::new(r"\b(__p \+=) '' \+").unwrap();
    static ref EMPTY_STRING_TRAILING: Regex = Regex::new(r"(__e\(.*?\)|\b__t\)) \+\n'';").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// SETTINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Delimiter patterns and binding mode. A `None` pattern disables that delimiter kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TemplateSettings {
    pub escape: Option<String>,
    pub evaluate: Option<String>,
    pub interpolate: Option<String>,
    /// Name holding the whole data mapping. Empty means the keys are opened as bare names.
    pub variable: String,
    /// Extra names visible to every render, looked up after the data context.
    pub imports: Map<String, Value>,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            escape: Some(ESCAPE_PATTERN.to_string()),
            evaluate: Some(EVALUATE_PATTERN.to_string()),
            interpolate: Some(INTERPOLATE_PATTERN.to_string()),
            variable: String::new(),
            imports: Map::new(),
        }
    }
}

impl TemplateSettings {
    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = variable.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Escape,
    Interpolate,
    Evaluate,
}

/// The combined alternation, with each capture group mapped back to its delimiter kind.
struct DelimiterSet {
    pattern: Regex,
    groups: Vec<Delimiter>,
}

fn single_group(pattern: &str) -> Result<String, TemplateError> {
    let re = Regex::new(pattern).map_err(|e| TemplateError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    if re.captures_len() != 2 {
        return Err(TemplateError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: format!("expected exactly one capture group, found {}", re.captures_len() - 1),
        });
    }
    Ok(pattern.to_string())
}

impl DelimiterSet {
    fn new(settings: &TemplateSettings) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut groups = Vec::new();
        if let Some(escape) = &settings.escape {
            parts.push(single_group(escape)?);
            groups.push(Delimiter::Escape);
        }
        if let Some(interpolate) = &settings.interpolate {
            parts.push(single_group(interpolate)?);
            groups.push(Delimiter::Interpolate);
            if interpolate == INTERPOLATE_PATTERN {
                parts.push(ES_TEMPLATE_PATTERN.to_string());
                groups.push(Delimiter::Interpolate);
            }
        }
        if let Some(evaluate) = &settings.evaluate {
            parts.push(single_group(evaluate)?);
            groups.push(Delimiter::Evaluate);
        }
        let joined = if parts.is_empty() {
            // Never matches
            r"(\z\A.)".to_string()
        } else {
            parts
                .iter()
                .map(|p| format!("(?:{p})"))
                .collect::<Vec<_>>()
                .join("|")
        };
        let pattern = Regex::new(&joined).map_err(|e| TemplateError::InvalidPattern {
            pattern: joined.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern, groups })
    }
}

fn escape_string_char(text: &str) -> String {
    UNESCAPED_STRING
        .replace_all(text, |caps: &regex::Captures| match &caps[0] {
            "\\" => "\\\\",
            "'" => "\\'",
            "\n" => "\\n",
            "\r" => "\\r",
            "\u{2028}" => "\\u2028",
            _ => "\\u2029",
        })
        .into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════════════════════

/// What a render sees besides the data mapping.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub globals: &'a Map<String, Value>,
    pub functions: &'a dyn Functions,
}

impl Default for RenderContext<'_> {
    fn default() -> Self {
        lazy_static! {
            static ref EMPTY: Map<String, Value> = Map::new();
        }
        Self {
            globals: &EMPTY,
            functions: &NoFunctions,
        }
    }
}

/// A compiled render function: `(data) -> html`.
pub trait Render {
    fn render(&self, data: &Map<String, Value>, ctx: RenderContext<'_>) -> Result<String, ScriptError>;

    /// Generated source, for debugging. Empty when a compiler has none.
    fn source(&self) -> &str {
        ""
    }
}

/// Replaces the default compiler for a component.
pub type CompileFn = Rc<dyn Fn(&str) -> Result<Rc<dyn Render>, TemplateError>>;

/// The built-in compiler as a [`CompileFn`].
pub fn default_compiler(settings: TemplateSettings) -> CompileFn {
    Rc::new(move |text: &str| Ok(Rc::new(compile(text, &settings)?) as Rc<dyn Render>))
}

pub struct Template {
    program: Program,
    source: String,
    variable: Option<String>,
    imports: Map<String, Value>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template").field("source", &self.source).finish()
    }
}

impl Template {
    /// Render without template functions or globals.
    pub fn call(&self, data: &Map<String, Value>) -> Result<String, ScriptError> {
        self.render(data, RenderContext::default())
    }
}

impl Render for Template {
    fn render(&self, data: &Map<String, Value>, ctx: RenderContext<'_>) -> Result<String, ScriptError> {
        let mut locals = Map::new();
        locals.insert("__t".to_string(), Value::Null);
        locals.insert("__p".to_string(), Value::String(String::new()));
        if let Some(variable) = &self.variable {
            locals.insert(variable.clone(), Value::Object(data.clone()));
        }
        let scope = Scope {
            data,
            implicit: self.variable.is_none(),
            shadow: None,
            imports: Some(&self.imports),
            globals: ctx.globals,
            functions: ctx.functions,
        };
        let mut outcome = self.program.run(scope, locals)?;
        match outcome.locals.remove("__p") {
            Some(Value::String(out)) => Ok(out),
            _ => Err(ScriptError::Type("template accumulator was reassigned".to_string())),
        }
    }

    fn source(&self) -> &str {
        &self.source
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn compile(text: &str, settings: &TemplateSettings) -> Result<Template, TemplateError> {
    let variable = settings.variable.as_str();
    if FORBIDDEN_IDENTIFIER_CHARS.is_match(variable) {
        return Err(TemplateError::InvalidVariable(settings.variable.clone()));
    }
    let delimiters = DelimiterSet::new(settings)?;

    let mut is_escaping = false;
    let mut is_evaluating = false;
    let mut index = 0;
    let mut body = String::from("__p += '");

    for caps in delimiters.pattern.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        body.push_str(&escape_string_char(&text[index..whole.start()]));

        let matched = delimiters
            .groups
            .iter()
            .enumerate()
            .find_map(|(i, kind)| caps.get(i + 1).map(|m| (*kind, m.as_str())));
        match matched {
            Some((Delimiter::Escape, expr)) => {
                is_escaping = true;
                body.push_str("' +\n__e(");
                body.push_str(expr);
                body.push_str(") +\n'");
            }
            Some((Delimiter::Evaluate, stmt)) => {
                is_evaluating = true;
                body.push_str("';\n");
                body.push_str(stmt);
                body.push_str(";\n__p += '");
            }
            Some((Delimiter::Interpolate, expr)) if !expr.is_empty() => {
                body.push_str("' +\n((__t = (");
                body.push_str(expr);
                body.push_str(")) == null ? '' : __t) +\n'");
            }
            _ => {}
        }
        index = whole.end();
    }
    body.push_str(&escape_string_char(&text[index..]));
    body.push_str("';\n");

    // Strip the empty literal concatenations adjacent delimiters leave behind
    if is_evaluating {
        body = EMPTY_STRING_LEADING.replace_all(&body, "").into_owned();
    }
    body = EMPTY_STRING_MIDDLE.replace_all(&body, "$1").into_owned();
    body = EMPTY_STRING_TRAILING.replace_all(&body, "$1;").into_owned();

    let program = Program::parse(&body).map_err(TemplateError::Syntax)?;
    let variable = (!variable.is_empty()).then(|| variable.to_string());
    let source = frame_source(&body, variable.as_deref(), is_escaping, is_evaluating);

    let mut imports = settings.imports.clone();
    imports.remove("uifactory");

    Ok(Template {
        program,
        source,
        variable,
        imports,
    })
}

fn frame_source(body: &str, variable: Option<&str>, is_escaping: bool, is_evaluating: bool) -> String {
    let mut out = format!("function({}) {{\n", variable.unwrap_or("obj"));
    if variable.is_none() {
        out.push_str("obj || (obj = {});\n");
    }
    out.push_str("var __t, __p = ''");
    if is_escaping {
        out.push_str(", __e = uifactory.escape");
    }
    if is_evaluating {
        out.push_str(", __j = Array.prototype.join;\nfunction print() { __p += __j.call(arguments, '') }\n");
    } else {
        out.push_str(";\n");
    }
    match variable {
        Some(_) => out.push_str(body),
        None => {
            out.push_str("with (obj) {\n");
            out.push_str(body);
            out.push_str("\n}\n");
        }
    }
    out.push_str("return __p\n}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn render(text: &str, value: Value) -> String {
        compile(text, &TemplateSettings::default())
            .unwrap()
            .call(&data(value))
            .unwrap()
    }

    #[test]
    fn test_three_delimiter_kinds() {
        assert_eq!(render("<%= a %>|<%- a %>", json!({"a": "<b>"})), "<b>|&lt;b&gt;");
        assert_eq!(
            render("<% for (var i = 0; i < n; i++) { %><%= i %><% } %>", json!({"n": 3})),
            "012"
        );
    }

    #[test]
    fn test_es_template_form() {
        assert_eq!(render("Hi ${name}!", json!({"name": "Ann"})), "Hi Ann!");
        let settings = TemplateSettings {
            interpolate: Some(r"\{\{([\s\S]+?)\}\}".to_string()),
            ..TemplateSettings::default()
        };
        let tmpl = compile("{{ a }} ${a}", &settings).unwrap();
        assert_eq!(tmpl.call(&data(json!({"a": 1}))).unwrap(), "1 ${a}");
    }

    #[test]
    fn test_null_interpolates_empty_but_zero_does_not() {
        assert_eq!(render("[<%= a %>][<%= b %>][<%- b %>]", json!({"a": null, "b": 0})), "[][0][0]");
    }

    #[test]
    fn test_literal_text_is_escaped_into_the_program() {
        let text = "it's a \\ back\nslash\r\u{2028}";
        assert_eq!(render(text, json!({})), text);
    }

    #[test]
    fn test_named_variable_mode() {
        let tmpl = compile("<%= data.x %>", &TemplateSettings::default().with_variable("data")).unwrap();
        assert_eq!(tmpl.call(&data(json!({"x": 5}))).unwrap(), "5");
        // Keys are not opened into scope in named mode
        let tmpl = compile("<%= x %>", &TemplateSettings::default().with_variable("data")).unwrap();
        assert!(tmpl.call(&data(json!({"x": 5}))).is_err());
    }

    #[test]
    fn test_forbidden_variable_characters() {
        for bad in ["a,b", "x)", "{a}", "a b", "a/b", "a=1"] {
            let err = compile("", &TemplateSettings::default().with_variable(bad)).unwrap_err();
            assert!(matches!(err, TemplateError::InvalidVariable(_)), "{bad}");
        }
    }

    #[test]
    fn test_empty_literal_cleanup() {
        let tmpl = compile("<%- a %>", &TemplateSettings::default()).unwrap();
        assert!(tmpl.source().contains("__p +=\n__e( a );"), "{}", tmpl.source());
        let tmpl = compile("<% x() %>", &TemplateSettings::default()).unwrap();
        assert!(!tmpl.source().contains("__p += '';"), "{}", tmpl.source());
        assert!(tmpl.source().contains("function print()"));
    }

    #[test]
    fn test_print_appends_output() {
        assert_eq!(render("a<% print(b, 1) %>c", json!({"b": "B"})), "aB1c");
    }

    #[test]
    fn test_imports_visible_after_data() {
        let mut settings = TemplateSettings::default();
        settings.imports.insert("unit".to_string(), json!("px"));
        let tmpl = compile("<%= w + unit %>", &settings).unwrap();
        assert_eq!(tmpl.call(&data(json!({"w": 3}))).unwrap(), "3px");
    }

    #[test]
    fn test_invalid_custom_pattern() {
        let settings = TemplateSettings {
            escape: Some(r"\[\[.+?\]\]".to_string()),
            ..TemplateSettings::default()
        };
        assert!(matches!(compile("x", &settings), Err(TemplateError::InvalidPattern { .. })));
    }

    #[test]
    fn test_deterministic_output() {
        let tmpl = compile("<% if (on) { %>yes<% } else { %>no<% } %>", &TemplateSettings::default()).unwrap();
        let d = data(json!({"on": true}));
        assert_eq!(tmpl.call(&d).unwrap(), tmpl.call(&d).unwrap());
        assert_eq!(tmpl.call(&data(json!({"on": false}))).unwrap(), "no");
    }
}
