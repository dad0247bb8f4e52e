//! HTML tree access via html5ever.
//!
//! Only two places need a real tree: finding `<template $name>` declarations in a document and
//! freezing an element's original light-DOM children for slot resolution. Template bodies
//! themselves are never re-parsed as a tree; they are rewritten as text.

use std::fmt;
use std::rc::Rc;

use html5ever::serialize::{serialize, SerializeOpts, TraversalScope};
use html5ever::{local_name, namespace_url, ns, parse_document, parse_fragment, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};
use tendril::TendrilSink;

use crate::error::Result;
use crate::escape::unescape;

// ═══════════════════════════════════════════════════════════════════════════════
// PARSING & SERIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parse_html(html: &str) -> Result<RcDom> {
    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut html.as_bytes())?;
    Ok(dom)
}

/// Parse markup as the children of a `<body>` and return the top-level nodes.
pub fn parse_nodes(html: &str) -> Result<Vec<Handle>> {
    let context = QualName::new(None, ns!(html), local_name!("body"));
    let dom = parse_fragment(RcDom::default(), Default::default(), context, Vec::new())
        .from_utf8()
        .read_from(&mut html.as_bytes())?;
    // Fragment parsing wraps the result in a synthetic <html> element
    let root = dom.document.children.borrow().first().cloned();
    Ok(match root {
        Some(root) => root.children.borrow().clone(),
        None => Vec::new(),
    })
}

fn to_html(handle: &Handle, scope: TraversalScope) -> String {
    let mut out = Vec::new();
    let opts = SerializeOpts {
        traversal_scope: scope,
        ..Default::default()
    };
    let node: SerializableHandle = handle.clone().into();
    if serialize(&mut out, &node, opts).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn outer_html(handle: &Handle) -> String {
    match &handle.data {
        NodeData::Text { contents } => contents
            .borrow()
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
        _ => to_html(handle, TraversalScope::IncludeNode),
    }
}

pub fn inner_html(handle: &Handle) -> String {
    if let NodeData::Element {
        template_contents, ..
    } = &handle.data
    {
        if let Some(contents) = template_contents.borrow().as_ref() {
            return to_html(contents, TraversalScope::ChildrenOnly(None));
        }
    }
    to_html(handle, TraversalScope::ChildrenOnly(None))
}

pub fn tag_name(handle: &Handle) -> Option<String> {
    match &handle.data {
        NodeData::Element { name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

pub fn attributes(handle: &Handle) -> Vec<(String, String)> {
    match &handle.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn attribute(handle: &Handle, name: &str) -> Option<String> {
    match &handle.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| &*attr.name.local == name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

fn walk(handle: &Handle, visit: &mut dyn FnMut(&Handle)) {
    for child in handle.children.borrow().iter() {
        visit(child);
        walk(child, visit);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// A `<template $name="…" attr="…">` element found in a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub attributes: Vec<(String, String)>,
    /// The template body, with the entity escaping of serialization undone.
    pub html: String,
}

impl Declaration {
    pub fn from_handle(handle: &Handle) -> Self {
        Self {
            attributes: attributes(handle),
            html: unescape(&inner_html(handle)),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == "$name")
            .map(|(_, value)| value.as_str())
    }
}

/// Every `<template>` carrying a `$name` attribute, in document order.
pub fn find_declarations(html: &str) -> Result<Vec<Declaration>> {
    let dom = parse_html(html)?;
    let mut found = Vec::new();
    walk(&dom.document, &mut |node| {
        if tag_name(node).as_deref() == Some("template") && attribute(node, "$name").is_some() {
            found.push(Declaration::from_handle(node));
        }
    });
    Ok(found)
}

/// The first element in `html`: its tag, attributes and inner markup.
pub fn first_element(html: &str) -> Result<Option<(String, Vec<(String, String)>, String)>> {
    let nodes = parse_nodes(html)?;
    Ok(nodes.iter().find_map(|node| {
        tag_name(node).map(|tag| (tag, attributes(node), inner_html(node)))
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIGHT-DOM CONTENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Frozen copy of an element's original children, consulted by slot substitution.
#[derive(Clone, Default)]
pub struct Contents {
    html: String,
    nodes: Rc<Vec<Handle>>,
}

impl fmt::Debug for Contents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Contents").field(&self.html).finish()
    }
}

impl Contents {
    pub fn parse(html: &str) -> Result<Self> {
        Ok(Self {
            html: html.to_string(),
            nodes: Rc::new(parse_nodes(html)?),
        })
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// Markup for a slot. Named slots take every descendant with a matching `slot` attribute,
    /// the default slot takes top-level children without one. `None` when nothing but
    /// whitespace matches.
    pub fn slot(&self, name: Option<&str>) -> Option<String> {
        let mut out = String::new();
        match name {
            Some(name) => {
                for node in self.nodes.iter() {
                    if attribute(node, "slot").as_deref() == Some(name) {
                        out.push_str(&outer_html(node));
                        continue;
                    }
                    walk(node, &mut |child| {
                        if attribute(child, "slot").as_deref() == Some(name) {
                            out.push_str(&outer_html(child));
                        }
                    });
                }
            }
            None => {
                for node in self.nodes.iter() {
                    if matches!(node.data, NodeData::Comment { .. }) || attribute(node, "slot").is_some() {
                        continue;
                    }
                    out.push_str(&outer_html(node));
                }
            }
        }
        if out.trim().is_empty() {
            None
        } else {
            Some(out)
        }
    }
}
