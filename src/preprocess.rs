//! Text-level rewrites applied to a component template before compilation.
//!
//! Everything here works on strings with regular expressions rather than a parsed tree:
//! template bodies routinely contain fragments (`<% for … %><tr>` and the like) that an HTML
//! parser would move or drop.
//!
//! Once per definition, [`prepare`] lifts out styles and scripts, collects event scripts,
//! block templates and JSON property declarations, and expands `name:="expr"` directives.
//! On every render, [`substitute_slots`] splices the element's light-DOM content into
//! `<slot>` placeholders.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;

use crate::component::PropertyDecl;
use crate::dom::Contents;
use crate::error::{ComponentError, Result};
use crate::escape::{escape, unescape};
use crate::host::Resource;
use crate::script::value::{is_truthy, to_string};

lazy_static! {
    /// Tags lifted out of the template
    static ref EXTRACT_REGEX: Regex = Regex::new(
        r"(?is)<script\b([^>]*)>(.*?)</script\s*>|<style\b([^>]*)>(.*?)</style\s*>|<link\b([^>]*)>"
    )
    .unwrap();

    static ref INLINE_SCRIPT_REGEX: Regex =
        Regex::new(r"(?is)<script\b[^>]*\$inline\b[^>]*>(.*?)</script\s*>").unwrap();

    /// Attributes inside a start tag
    static ref ATTR_REGEX: Regex =
        Regex::new(r#"([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap();

    /// `name:="expr"`, `name:js='expr'`, or a bare `:="obj"`
    static ref DIRECTIVE_REGEX: Regex =
        Regex::new(r#"\s([^\s"'<>/=:]*):(?:js)?=(?:"([^"]*)"|'([^']*)')"#).unwrap();

    static ref SLOT_REGEX: Regex =
        Regex::new(r"(?is)<slot\b([^>]*?)/>|<slot\b([^>]*)>(.*?)</slot\s*>").unwrap();

    static ref DELIMITER_START_REGEX: Regex = Regex::new(r"<%|\$\{").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

/// A `<script on<event>>` block, run when the element dispatches `event`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventScript {
    pub event: String,
    pub body: String,
    /// Name the event is bound to inside the script.
    pub param: String,
    pub once: bool,
}

/// A component template split into what renders and what does not.
#[derive(Debug, Clone, Default)]
pub struct Prepared {
    /// Render template with directives expanded, still holding `<slot>` placeholders.
    pub template: String,
    pub head: Vec<Resource>,
    pub body: Vec<Resource>,
    pub events: Vec<EventScript>,
    pub blocks: IndexMap<String, String>,
    pub properties: IndexMap<String, PropertyDecl>,
}

#[derive(Deserialize)]
struct JsonConfig {
    #[serde(default)]
    properties: IndexMap<String, PropertyDecl>,
}

pub fn parse_attributes(source: &str) -> Vec<(String, String)> {
    ATTR_REGEX
        .captures_iter(source)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_string();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

fn find<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

pub fn prepare(template: &str) -> Result<Prepared> {
    let template = INLINE_SCRIPT_REGEX.replace_all(template, |caps: &Captures| format!("<% {} %>", &caps[1]));

    let mut prepared = Prepared::default();
    let mut remainder = String::with_capacity(template.len());
    let mut main_script: Option<String> = None;
    let mut last = 0;

    for caps in EXTRACT_REGEX.captures_iter(&template) {
        let Some(whole) = caps.get(0) else { continue };

        if let Some(link) = caps.get(5) {
            let attributes = parse_attributes(link.as_str());
            if !find(&attributes, "rel").is_some_and(|rel| rel.eq_ignore_ascii_case("stylesheet")) {
                continue;
            }
            prepared.head.push(Resource {
                tag: "link".into(),
                attributes,
                text: String::new(),
            });
        } else if let Some(style) = caps.get(3) {
            prepared.head.push(Resource {
                tag: "style".into(),
                attributes: parse_attributes(style.as_str()),
                text: caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_default(),
            });
        } else if let Some(script) = caps.get(1) {
            let attributes = parse_attributes(script.as_str());
            let text = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            classify_script(&mut prepared, &mut main_script, attributes, text)?;
        }

        remainder.push_str(&template[last..whole.start()]);
        last = whole.end();
    }
    remainder.push_str(&template[last..]);

    let html = unescape(main_script.as_deref().unwrap_or(remainder.as_str()));
    prepared.template = expand_directives(&html);
    for block in prepared.blocks.values_mut() {
        *block = expand_directives(block);
    }
    Ok(prepared)
}

fn classify_script(
    prepared: &mut Prepared,
    main_script: &mut Option<String>,
    attributes: Vec<(String, String)>,
    text: &str,
) -> Result<()> {
    let events: Vec<(String, String)> = attributes
        .iter()
        .filter(|(key, _)| {
            key.len() > 2 && key.to_ascii_lowercase().starts_with("on") && !key.eq_ignore_ascii_case("once")
        })
        .map(|(key, value)| (key[2..].to_ascii_lowercase(), value.clone()))
        .collect();
    if !events.is_empty() {
        let once = find(&attributes, "once").is_some();
        for (event, param) in events {
            prepared.events.push(EventScript {
                event,
                body: text.to_string(),
                param: if param.trim().is_empty() {
                    "e".to_string()
                } else {
                    param.trim().to_string()
                },
                once,
            });
        }
        return Ok(());
    }

    match find(&attributes, "type").map(|t| t.trim().to_ascii_lowercase()).as_deref() {
        Some("text/html") => match find(&attributes, "$block") {
            Some(name) => {
                prepared.blocks.insert(name.to_string(), text.to_string());
            }
            None if main_script.is_none() => *main_script = Some(text.to_string()),
            None => {}
        },
        Some("application/json") => {
            let config: JsonConfig = serde_json::from_str(text)
                .map_err(|e| ComponentError::Config(format!("invalid JSON configuration: {e}")))?;
            prepared.properties.extend(config.properties);
        }
        _ => prepared.body.push(Resource {
            tag: "script".into(),
            attributes,
            text: text.to_string(),
        }),
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTE DIRECTIVES
// ═══════════════════════════════════════════════════════════════════════════════

/// Rewrite `name:="expr"` into an interpolation of the attribute helper.
pub fn expand_directives(template: &str) -> String {
    DIRECTIVE_REGEX
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            let expr = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str()).unwrap_or("");
            let expr = if expr.trim().is_empty() { "null" } else { expr };
            format!("<%= __attr({name:?}, {expr}) %>")
        })
        .into_owned()
}

fn push_classes(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| push_classes(item, out)),
        Value::Object(map) => {
            for (key, on) in map {
                if is_truthy(on) {
                    out.push(key.clone());
                }
            }
        }
        other if is_truthy(other) => out.push(to_string(other)),
        _ => {}
    }
}

/// Serialize one attribute, leading space included. Returns an empty string when the
/// attribute should be absent.
pub fn serialize_attribute(name: &str, value: &Value) -> String {
    if name.is_empty() {
        return match value {
            Value::Object(map) => map.iter().map(|(key, v)| serialize_attribute(key, v)).collect(),
            _ => String::new(),
        };
    }
    match value {
        Value::Null | Value::Bool(_) => {
            if is_truthy(value) {
                format!(" {name}")
            } else {
                String::new()
            }
        }
        Value::Number(_) => format!(" {name}=\"{}\"", to_string(value)),
        Value::Object(map) if name == "style" => {
            let rules: String = map
                .iter()
                .filter(|(_, v)| is_truthy(v) || v.as_f64() == Some(0.0))
                .map(|(prop, v)| format!("{prop}:{};", to_string(v)))
                .collect();
            format!(" style=\"{}\"", escape(&rules))
        }
        Value::Object(_) | Value::Array(_) if name == "class" => {
            let mut classes = Vec::new();
            push_classes(value, &mut classes);
            format!(" class=\"{}\"", escape(&classes.join(" ")))
        }
        Value::String(s) => format!(" {name}=\"{}\"", escape(s)),
        Value::Object(_) | Value::Array(_) => {
            let json = serde_json::to_string(value).unwrap_or_default();
            format!(" {name}=\"{}\"", escape(&json))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SLOTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Author markup spliced into a template must never be evaluated.
fn neutralise(markup: &str) -> String {
    DELIMITER_START_REGEX
        .replace_all(markup, |caps: &Captures| format!("<%= '{}' %>", &caps[0]))
        .into_owned()
}

/// Replace every `<slot>` / `<slot name="x">` with matching light-DOM content, or leave its
/// fallback content when nothing matches.
pub fn substitute_slots(template: &str, contents: &Contents) -> String {
    SLOT_REGEX
        .replace_all(template, |caps: &Captures| {
            let attrs = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
            let attrs = parse_attributes(attrs);
            let name = find(&attrs, "name").filter(|n| !n.is_empty());
            match contents.slot(name) {
                Some(markup) => neutralise(&markup),
                None => caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_styles_and_scripts_in_order() {
        let prepared = prepare(
            r#"<style>p{}</style><link rel="stylesheet" href="a.css"><link rel="icon" href="i.png">
<script src="a.js"></script><script>init()</script><p>body</p>"#,
        )
        .unwrap();
        assert_eq!(prepared.head.len(), 2);
        assert_eq!(prepared.head[0].text, "p{}");
        assert_eq!(prepared.head[1].src(), Some("a.css"));
        let body: Vec<_> = prepared.body.iter().map(|r| (r.src(), r.text.as_str())).collect();
        assert_eq!(body, vec![(Some("a.js"), ""), (None, "init()")]);
        assert!(prepared.template.contains(r#"<link rel="icon" href="i.png">"#));
        assert!(prepared.template.contains("<p>body</p>"));
        assert!(!prepared.template.contains("script"));
    }

    #[test]
    fn test_event_scripts_and_blocks() {
        let prepared = prepare(
            r#"<script onrender once>count++</script><script onclick="ev">x = ev.type</script>
<script type="text/html" $block="row"><li><%= item %></li></script>
<script type="text/html"><ul><%= row({item: 1}) %></ul></script>ignored"#,
        )
        .unwrap();
        assert_eq!(
            prepared.events,
            vec![
                EventScript {
                    event: "render".into(),
                    body: "count++".into(),
                    param: "e".into(),
                    once: true
                },
                EventScript {
                    event: "click".into(),
                    body: "x = ev.type".into(),
                    param: "ev".into(),
                    once: false
                },
            ]
        );
        assert_eq!(prepared.blocks["row"], "<li><%= item %></li>");
        assert_eq!(prepared.template, "<ul><%= row({item: 1}) %></ul>");
        assert!(prepared.body.is_empty());
    }

    #[test]
    fn test_json_properties() {
        let prepared = prepare(
            r#"<script type="application/json">{"properties": {"size": {"type": "number", "value": "3"}}}</script>x"#,
        )
        .unwrap();
        assert_eq!(prepared.properties["size"].type_name.as_deref(), Some("number"));
        assert!(prepare(r#"<script type="application/json">{oops</script>"#).is_err());
    }

    #[test]
    fn test_inline_script_becomes_evaluate_block() {
        let prepared = prepare("<script $inline>var x = 1</script><%= x %>").unwrap();
        assert_eq!(prepared.template, "<% var x = 1 %><%= x %>");
    }

    #[test]
    fn test_directive_expansion() {
        assert_eq!(
            expand_directives(r#"<a class:="['a','b']" disabled:js='off'>"#),
            r#"<a<%= __attr("class", ['a','b']) %><%= __attr("disabled", off) %>>"#
        );
        assert_eq!(expand_directives(r#"<a :="attrs">"#), r#"<a<%= __attr("", attrs) %>>"#);
        // Typed attributes are not directives
        assert_eq!(expand_directives(r#"<a x:number="1">"#), r#"<a x:number="1">"#);
    }

    #[test]
    fn test_attribute_serialization() {
        assert_eq!(serialize_attribute("class", &json!(["a", "b"])), r#" class="a b""#);
        assert_eq!(
            serialize_attribute("class", &json!(["a", {"b": true, "c": false}, ["d"]])),
            r#" class="a b d""#
        );
        assert_eq!(serialize_attribute("disabled", &json!(false)), "");
        assert_eq!(serialize_attribute("disabled", &json!(true)), " disabled");
        assert_eq!(serialize_attribute("disabled", &Value::Null), "");
        assert_eq!(serialize_attribute("width", &json!(3)), r#" width="3""#);
        assert_eq!(
            serialize_attribute("style", &json!({"color": "red", "margin": 0, "padding": null})),
            r#" style="color:red;margin:0;""#
        );
        assert_eq!(serialize_attribute("title", &json!("a\"b")), r#" title="a&quot;b""#);
        assert_eq!(
            serialize_attribute("", &json!({"id": "x", "hidden": true})),
            r#" id="x" hidden"#
        );
    }

    #[test]
    fn test_slot_substitution() {
        let contents = Contents::parse(r#"<b slot="foo">HELLO</b>rest"#).unwrap();
        let template = r#"<h1><slot name="foo">fallback</slot></h1><p><slot></slot></p>"#;
        assert_eq!(
            substitute_slots(template, &contents),
            r#"<h1><b slot="foo">HELLO</b></h1><p>rest</p>"#
        );

        let empty = Contents::parse("").unwrap();
        assert_eq!(
            substitute_slots(template, &empty),
            "<h1>fallback</h1><p></p>"
        );
    }

    #[test]
    fn test_slot_content_is_not_evaluated() {
        let contents = Contents::parse(r#"<i title="<%x%>">${secret}</i>"#).unwrap();
        assert_eq!(
            substitute_slots("<slot/>", &contents),
            r#"<i title="<%= '<%' %>x%>"><%= '${' %>secret}</i>"#
        );
    }
}
