//! HTML entity escaping used by `<%- %>` delimiters, and the inverse transform applied to
//! template markup that arrives entity-encoded from a parsed `<template>` element.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::script::value::to_string;

lazy_static! {
    static ref UNESCAPED_HTML: Regex = Regex::new(r#"[&<>"']"#).unwrap();
    static ref ESCAPED_HTML: Regex = Regex::new(r"&(?:amp|lt|gt|quot|#(0+)?39);").unwrap();
}

/// Escape `& < > " '` into their HTML entities.
pub fn escape(text: &str) -> String {
    if !UNESCAPED_HTML.is_match(text) {
        return text.to_string();
    }
    UNESCAPED_HTML
        .replace_all(text, |caps: &regex::Captures| match &caps[0] {
            "&" => "&amp;",
            "<" => "&lt;",
            ">" => "&gt;",
            "\"" => "&quot;",
            _ => "&#39;",
        })
        .into_owned()
}

/// Escape the string form of a script value. `null` escapes to the empty string, `0` to `"0"`.
pub fn escape_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => escape(s),
        other => escape(&to_string(other)),
    }
}

/// Reverse of [`escape`]. `&#39;` may carry leading zeros (`&#039;`).
pub fn unescape(text: &str) -> String {
    if !ESCAPED_HTML.is_match(text) {
        return text.to_string();
    }
    ESCAPED_HTML
        .replace_all(text, |caps: &regex::Captures| match &caps[0] {
            "&amp;" => "&",
            "&lt;" => "<",
            "&gt;" => ">",
            "&quot;" => "\"",
            _ => "'",
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_entities() {
        assert_eq!(
            escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_escape_value_keeps_zero() {
        assert_eq!(escape_value(&serde_json::json!(0)), "0");
        assert_eq!(escape_value(&Value::Null), "");
    }

    #[test]
    fn test_unescape_entities() {
        assert_eq!(unescape("&lt;% if (a &gt; b) { %&gt;"), "<% if (a > b) { %>");
        assert_eq!(unescape("it&#039;s &#39;ok&#39;"), "it's 'ok'");
        // Unknown entities are left alone
        assert_eq!(unescape("&nbsp;&amp;"), "&nbsp;&");
    }
}
