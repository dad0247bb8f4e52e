//! The fixed set of globals, namespaces and methods scripts may call.
//!
//! Every lookup returns `None` for names outside the allow-list so the interpreter can
//! report a `ReferenceError` or "is not a function" instead of silently succeeding.

use serde_json::{Map, Value};

use super::value::{self, is_truthy, number, to_number, to_string};
use crate::error::ScriptError;
use crate::escape;

/// Longest string, in bytes, a script may build.
pub const MAX_STRING_LENGTH: usize = 1 << 28;

const NAMESPACES: &[&str] = &["Math", "JSON", "Object", "Array", "Number", "uifactory"];

pub fn is_namespace(name: &str) -> bool {
    NAMESPACES.contains(&name)
}

fn arg(args: &[Value], idx: usize) -> &Value {
    args.get(idx).unwrap_or(&Value::Null)
}

fn str_arg(args: &[Value], idx: usize) -> String {
    match args.get(idx) {
        Some(Value::Null) | None => String::new(),
        Some(v) => to_string(v),
    }
}

/// Integer argument with JS-style negative indexing relative to `len`.
fn index_arg(args: &[Value], idx: usize, len: usize, default: usize) -> usize {
    match args.get(idx) {
        None | Some(Value::Null) => default,
        Some(v) => {
            let n = to_number(v);
            if n.is_nan() {
                0
            } else if n < 0.0 {
                len.saturating_sub((-n) as usize)
            } else {
                (n as usize).min(len)
            }
        }
    }
}

fn parse_int(text: &str, radix: u32) -> f64 {
    let text = text.trim_start();
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, rest) = match (radix, rest.get(..2)) {
        (0 | 16, Some("0x" | "0X")) => (16, &rest[2..]),
        (0, _) => (10, rest),
        (r, _) => (r, rest),
    };
    let digits: String = rest.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let n = i64::from_str_radix(&digits, radix).map(|n| n as f64).unwrap_or(f64::NAN);
    if negative {
        -n
    } else {
        n
    }
}

fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    for (i, c) in text.char_indices() {
        let ok = match c {
            '0'..='9' => true,
            '+' | '-' => i == 0 || text[..i].ends_with(['e', 'E']),
            '.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            'e' | 'E' if !seen_exp && i > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    // Back off a dangling exponent or sign
    let mut candidate = &text[..end];
    while !candidate.is_empty() && candidate.parse::<f64>().is_err() {
        candidate = &candidate[..candidate.len() - 1];
    }
    if candidate.is_empty() {
        if text.starts_with("Infinity") {
            return f64::INFINITY;
        }
        return f64::NAN;
    }
    candidate.parse().unwrap_or(f64::NAN)
}

/// A JSON text for `value`, or `None` where `JSON.stringify` yields `undefined`.
pub fn json_stringify(value: &Value, indent: Option<usize>) -> Option<String> {
    if value.is_null() {
        return Some("null".to_string());
    }
    match indent {
        Some(width) if width > 0 => {
            let pad = " ".repeat(width.min(10));
            let mut out = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
            let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
            serde::Serialize::serialize(value, &mut ser).ok()?;
            String::from_utf8(out).ok()
        }
        _ => serde_json::to_string(value).ok(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn call_global(name: &str, args: &[Value]) -> Option<Result<Value, ScriptError>> {
    let result = match name {
        "__e" => Value::String(escape::escape_value(arg(args, 0))),
        "String" => Value::String(match args.first() {
            None => String::new(),
            Some(v) => to_string(v),
        }),
        "Number" => number(args.first().map(to_number).unwrap_or(0.0)),
        "Boolean" => Value::Bool(is_truthy(arg(args, 0))),
        "parseInt" => {
            let radix = args.get(1).map(to_number).unwrap_or(0.0) as u32;
            if radix != 0 && !(2..=36).contains(&radix) {
                return Some(Ok(Value::Null));
            }
            number(parse_int(&str_arg(args, 0), radix))
        }
        "parseFloat" => number(parse_float(&str_arg(args, 0))),
        "isNaN" => Value::Bool(to_number(arg(args, 0)).is_nan()),
        "isFinite" => Value::Bool(to_number(arg(args, 0)).is_finite()),
        _ => return None,
    };
    Some(Ok(result))
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMESPACES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn namespace_property(ns: &str, key: &str) -> Option<Value> {
    match (ns, key) {
        ("Math", "PI") => Some(number(std::f64::consts::PI)),
        ("Math", "E") => Some(number(std::f64::consts::E)),
        ("Number", "MAX_SAFE_INTEGER") => Some(number(9_007_199_254_740_991.0)),
        ("Number", "MIN_SAFE_INTEGER") => Some(number(-9_007_199_254_740_991.0)),
        _ => None,
    }
}

pub fn call_namespace(ns: &str, method: &str, args: &[Value]) -> Option<Result<Value, ScriptError>> {
    match ns {
        "Math" => call_math(method, args).map(Ok),
        "JSON" => call_json(method, args),
        "Object" => call_object(method, args).map(Ok),
        "Array" => match method {
            "isArray" => Some(Ok(Value::Bool(arg(args, 0).is_array()))),
            "from" => Some(Ok(Value::Array(match arg(args, 0) {
                Value::Array(items) => items.clone(),
                Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                _ => Vec::new(),
            }))),
            _ => None,
        },
        "Number" => match method {
            "isInteger" => Some(Ok(Value::Bool(match arg(args, 0) {
                Value::Number(n) => n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0),
                _ => false,
            }))),
            "isFinite" => Some(Ok(Value::Bool(match arg(args, 0) {
                Value::Number(n) => n.as_f64().is_some_and(f64::is_finite),
                _ => false,
            }))),
            "parseFloat" => Some(Ok(number(parse_float(&str_arg(args, 0))))),
            "parseInt" => call_global("parseInt", args),
            _ => None,
        },
        "uifactory" => match method {
            "escape" => Some(Ok(Value::String(escape::escape_value(arg(args, 0))))),
            "unescape" => Some(Ok(Value::String(escape::unescape(&str_arg(args, 0))))),
            _ => None,
        },
        _ => None,
    }
}

fn call_math(method: &str, args: &[Value]) -> Option<Value> {
    let x = args.first().map(to_number).unwrap_or(f64::NAN);
    let result = match method {
        "abs" => x.abs(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => (x + 0.5).floor(),
        "trunc" => x.trunc(),
        "sign" => {
            if x == 0.0 || x.is_nan() {
                x
            } else {
                x.signum()
            }
        }
        "sqrt" => x.sqrt(),
        "pow" => x.powf(args.get(1).map(to_number).unwrap_or(f64::NAN)),
        "min" => args.iter().map(to_number).fold(f64::INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.min(b)
            }
        }),
        "max" => args.iter().map(to_number).fold(f64::NEG_INFINITY, |a, b| {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.max(b)
            }
        }),
        _ => return None,
    };
    Some(number(result))
}

fn call_json(method: &str, args: &[Value]) -> Option<Result<Value, ScriptError>> {
    match method {
        "stringify" => {
            let indent = match args.get(2) {
                Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
                _ => None,
            };
            Some(Ok(json_stringify(arg(args, 0), indent)
                .map(Value::String)
                .unwrap_or(Value::Null)))
        }
        "parse" => Some(
            serde_json::from_str::<Value>(&str_arg(args, 0))
                .map_err(|e| ScriptError::syntax(format!("JSON.parse: {e}"), 0)),
        ),
        _ => None,
    }
}

fn call_object(method: &str, args: &[Value]) -> Option<Value> {
    let entries: Vec<(String, Value)> = match arg(args, 0) {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        _ => Vec::new(),
    };
    let result = match method {
        "keys" => Value::Array(entries.into_iter().map(|(k, _)| Value::String(k)).collect()),
        "values" => Value::Array(entries.into_iter().map(|(_, v)| v).collect()),
        "entries" => Value::Array(
            entries
                .into_iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                .collect(),
        ),
        "assign" => {
            let mut target = match arg(args, 0) {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            for source in args.iter().skip(1) {
                if let Value::Object(map) = source {
                    for (k, v) in map {
                        target.insert(k.clone(), v.clone());
                    }
                }
            }
            Value::Object(target)
        }
        _ => return None,
    };
    Some(result)
}

// ═══════════════════════════════════════════════════════════════════════════════
// METHODS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Option<Result<Value, ScriptError>> {
    if method == "toString" {
        return Some(Ok(Value::String(to_string(receiver))));
    }
    let result = match receiver {
        Value::String(s) if matches!(method, "repeat" | "padStart" | "padEnd" | "concat") => {
            return Some(string_growth(s, method, args))
        }
        Value::String(s) => string_method(s, method, args),
        Value::Array(items) => array_method(items, method, args),
        Value::Number(n) => match method {
            "toFixed" => {
                let digits = args.first().map(to_number).unwrap_or(0.0).clamp(0.0, 100.0) as usize;
                Some(Value::String(format!("{:.*}", digits, n.as_f64().unwrap_or(f64::NAN))))
            }
            _ => None,
        },
        Value::Object(map) => match method {
            "hasOwnProperty" => Some(Value::Bool(map.contains_key(&str_arg(args, 0)))),
            _ => None,
        },
        Value::Null => {
            return Some(Err(ScriptError::Type(format!(
                "Cannot read properties of null (reading '{method}')"
            ))))
        }
        Value::Bool(_) => None,
    };
    result.map(Ok)
}

/// Methods whose result length is chosen by the caller. Results are capped at
/// [`MAX_STRING_LENGTH`] bytes.
fn string_growth(s: &str, method: &str, args: &[Value]) -> Result<Value, ScriptError> {
    let too_long = || ScriptError::Range("Invalid string length".to_string());
    match method {
        "repeat" => {
            let count = to_number(arg(args, 0));
            if !count.is_finite() || count < 0.0 {
                return Err(ScriptError::Range(format!("Invalid count value: {}", to_string(arg(args, 0)))));
            }
            let count = count as usize;
            if s.len().saturating_mul(count) > MAX_STRING_LENGTH {
                return Err(too_long());
            }
            Ok(Value::String(s.repeat(count)))
        }
        "padStart" | "padEnd" => {
            let len = s.chars().count();
            let width = to_number(arg(args, 0));
            let width = if width.is_nan() { 0.0 } else { width.max(0.0) };
            let fill = match args.get(1) {
                None | Some(Value::Null) => " ".to_string(),
                Some(v) => to_string(v),
            };
            if width <= len as f64 || fill.is_empty() {
                return Ok(Value::String(s.to_string()));
            }
            if width > MAX_STRING_LENGTH as f64 {
                return Err(too_long());
            }
            let missing = width as usize - len;
            let fill_chars = fill.chars().count();
            let pad_bytes = missing / fill_chars * fill.len()
                + fill.chars().take(missing % fill_chars).map(char::len_utf8).sum::<usize>();
            if s.len() + pad_bytes > MAX_STRING_LENGTH {
                return Err(too_long());
            }
            let pad: String = fill.chars().cycle().take(missing).collect();
            Ok(Value::String(if method == "padStart" {
                format!("{pad}{s}")
            } else {
                format!("{s}{pad}")
            }))
        }
        _ => {
            let mut out = s.to_string();
            for a in args {
                out.push_str(&to_string(a));
                if out.len() > MAX_STRING_LENGTH {
                    return Err(too_long());
                }
            }
            Ok(Value::String(out))
        }
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Option<Value> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let slice = |start: usize, end: usize| -> Value {
        if start >= end {
            Value::String(String::new())
        } else {
            Value::String(chars[start..end].iter().collect())
        }
    };
    let char_index = |byte: usize| s[..byte].chars().count() as f64;

    let result = match method {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::String(s.trim().to_string()),
        "trimStart" => Value::String(s.trim_start().to_string()),
        "trimEnd" => Value::String(s.trim_end().to_string()),
        "includes" => Value::Bool(s.contains(&str_arg(args, 0))),
        "startsWith" => Value::Bool(s.starts_with(&str_arg(args, 0))),
        "endsWith" => Value::Bool(s.ends_with(&str_arg(args, 0))),
        "indexOf" => number(s.find(&str_arg(args, 0)).map(char_index).unwrap_or(-1.0)),
        "lastIndexOf" => number(s.rfind(&str_arg(args, 0)).map(char_index).unwrap_or(-1.0)),
        "slice" => slice(index_arg(args, 0, len, 0), index_arg(args, 1, len, len)),
        "substring" => {
            let clamp = |idx: usize, default: usize| match args.get(idx) {
                None | Some(Value::Null) => default,
                Some(v) => to_number(v).max(0.0).min(len as f64) as usize,
            };
            let (a, b) = (clamp(0, 0), clamp(1, len));
            slice(a.min(b), a.max(b))
        }
        "charAt" => slice(index_arg(args, 0, len, 0), (index_arg(args, 0, len, 0) + 1).min(len)),
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Null) => vec![Value::String(s.to_string())],
                Some(sep) => {
                    let sep = to_string(sep);
                    if sep.is_empty() {
                        chars.iter().map(|c| Value::String(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect()
                    }
                }
            };
            Value::Array(parts)
        }
        "replace" => Value::String(s.replacen(&str_arg(args, 0), &str_arg(args, 1), 1)),
        "replaceAll" => {
            let from = str_arg(args, 0);
            if from.is_empty() {
                Value::String(s.to_string())
            } else {
                Value::String(s.replace(&from, &str_arg(args, 1)))
            }
        }
        _ => return None,
    };
    Some(result)
}

fn array_method(items: &[Value], method: &str, args: &[Value]) -> Option<Value> {
    let len = items.len();
    let result = match method {
        "join" => {
            let sep = match args.first() {
                None | Some(Value::Null) => ",".to_string(),
                Some(v) => to_string(v),
            };
            Value::String(
                items
                    .iter()
                    .map(|item| if item.is_null() { String::new() } else { to_string(item) })
                    .collect::<Vec<_>>()
                    .join(&sep),
            )
        }
        "includes" => Value::Bool(items.iter().any(|item| value::strict_equals(item, arg(args, 0)))),
        "indexOf" => number(
            items
                .iter()
                .position(|item| value::strict_equals(item, arg(args, 0)))
                .map(|i| i as f64)
                .unwrap_or(-1.0),
        ),
        "slice" => {
            let (start, end) = (index_arg(args, 0, len, 0), index_arg(args, 1, len, len));
            Value::Array(if start < end { items[start..end].to_vec() } else { Vec::new() })
        }
        "concat" => {
            let mut out = items.to_vec();
            for a in args {
                match a {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::Array(out)
        }
        "reverse" => Value::Array(items.iter().rev().cloned().collect()),
        _ => return None,
    };
    Some(result)
}
