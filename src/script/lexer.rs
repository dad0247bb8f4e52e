//! Tokenizer for the expression language.

use crate::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Num(f64),
    Str(String),
    /// Back-tick literal, split into text and `${…}` source chunks.
    Template(Vec<TemplateChunk>),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
    /// A line terminator precedes this token. Used to end statements without `;`.
    pub newline_before: bool,
}

// Longest first so that `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "...", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=",
    "*=", "/=", "%=", "=>", "+", "-", "*", "/", "%", "<", ">", "=", "!", "?", ":", ".", ",", ";",
    "(", ")", "[", "]", "{", "}",
];

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, ScriptError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut newline_before = false;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c == '\n' || c == '\r' || c == '\u{2028}' || c == '\u{2029}' {
            newline_before = true;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments
        if c == '/' && i + 1 < chars.len() {
            match chars[i + 1].1 {
                '/' => {
                    while i < chars.len() && chars[i].1 != '\n' {
                        i += 1;
                    }
                    continue;
                }
                '*' => {
                    i += 2;
                    loop {
                        if i + 1 >= chars.len() {
                            return Err(ScriptError::syntax("unterminated comment", offset));
                        }
                        if chars[i].1 == '\n' {
                            newline_before = true;
                        }
                        if chars[i].1 == '*' && chars[i + 1].1 == '/' {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                    continue;
                }
                _ => {}
            }
        }

        let token = if c.is_ascii_digit()
            || (c == '.' && i + 1 < chars.len() && chars[i + 1].1.is_ascii_digit())
        {
            let (num, next) = read_number(src, &chars, i)?;
            i = next;
            Token::Num(num)
        } else if c == '"' || c == '\'' {
            let (text, next) = read_string(&chars, i, c)?;
            i = next;
            Token::Str(text)
        } else if c == '`' {
            let (chunks, next) = read_template(&chars, i)?;
            i = next;
            Token::Template(chunks)
        } else if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_part(chars[i].1) {
                i += 1;
            }
            Token::Ident(chars[start..i].iter().map(|(_, c)| c).collect())
        } else {
            let rest = &src[offset..];
            let punct = PUNCTUATORS
                .iter()
                .find(|p| {
                    // `a?.5:1` is a conditional, not optional chaining
                    if **p == "?." {
                        rest.starts_with("?.")
                            && !rest[2..].starts_with(|c: char| c.is_ascii_digit())
                    } else {
                        rest.starts_with(**p)
                    }
                })
                .ok_or_else(|| ScriptError::syntax(format!("unexpected character {c:?}"), offset))?;
            i += punct.chars().count();
            Token::Punct(punct)
        };

        tokens.push(Spanned {
            token,
            offset,
            newline_before,
        });
        newline_before = false;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: src.len(),
        newline_before,
    });
    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn read_number(src: &str, chars: &[(usize, char)], start: usize) -> Result<(f64, usize), ScriptError> {
    let offset = chars[start].0;
    let mut i = start;

    if chars[i].1 == '0' && i + 1 < chars.len() && matches!(chars[i + 1].1, 'x' | 'X') {
        i += 2;
        let digits_start = i;
        while i < chars.len() && chars[i].1.is_ascii_hexdigit() {
            i += 1;
        }
        let digits: String = chars[digits_start..i].iter().map(|(_, c)| c).collect();
        return u64::from_str_radix(&digits, 16)
            .map(|n| (n as f64, i))
            .map_err(|_| ScriptError::syntax("invalid hex literal", offset));
    }

    while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
        i += 1;
    }
    if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
        let mut j = i + 1;
        if j < chars.len() && matches!(chars[j].1, '+' | '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].1.is_ascii_digit() {
            i = j;
            while i < chars.len() && chars[i].1.is_ascii_digit() {
                i += 1;
            }
        }
    }
    let end = if i < chars.len() { chars[i].0 } else { src.len() };
    src[offset..end]
        .parse::<f64>()
        .map(|n| (n, i))
        .map_err(|_| ScriptError::syntax(format!("invalid number {:?}", &src[offset..end]), offset))
}

/// Reads one escape sequence after a backslash. Returns `None` for a line continuation.
fn read_escape(chars: &[(usize, char)], i: &mut usize) -> Result<Option<char>, ScriptError> {
    let (offset, c) = chars[*i];
    *i += 1;
    Ok(Some(match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'b' => '\u{8}',
        'f' => '\u{c}',
        'v' => '\u{b}',
        '0' => '\0',
        '\n' => return Ok(None),
        'x' => {
            let hex: String = chars.iter().skip(*i).take(2).map(|(_, c)| c).collect();
            *i += 2;
            u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| ScriptError::syntax("invalid \\x escape", offset))?
        }
        'u' => {
            let braced = chars.get(*i).map(|(_, c)| *c) == Some('{');
            let hex: String = if braced {
                *i += 1;
                let digits: String = chars[*i..]
                    .iter()
                    .map(|(_, c)| *c)
                    .take_while(|c| *c != '}')
                    .collect();
                *i += digits.chars().count() + 1;
                digits
            } else {
                let digits: String = chars.iter().skip(*i).take(4).map(|(_, c)| c).collect();
                *i += 4;
                digits
            };
            u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| ScriptError::syntax("invalid \\u escape", offset))?
        }
        other => other,
    }))
}

fn read_string(chars: &[(usize, char)], start: usize, quote: char) -> Result<(String, usize), ScriptError> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((text, i + 1));
        }
        if c == '\n' {
            break;
        }
        i += 1;
        if c == '\\' && i < chars.len() {
            if let Some(escaped) = read_escape(chars, &mut i)? {
                text.push(escaped);
            }
        } else {
            text.push(c);
        }
    }
    Err(ScriptError::syntax("unterminated string", chars[start].0))
}

fn read_template(chars: &[(usize, char)], start: usize) -> Result<(Vec<TemplateChunk>, usize), ScriptError> {
    let mut chunks = Vec::new();
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == '`' {
            if !text.is_empty() {
                chunks.push(TemplateChunk::Text(text));
            }
            return Ok((chunks, i + 1));
        }
        if c == '$' && chars.get(i + 1).map(|(_, c)| *c) == Some('{') {
            if !text.is_empty() {
                chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
            }
            i += 2;
            let mut depth = 1;
            let mut expr = String::new();
            while i < chars.len() {
                let c = chars[i].1;
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                expr.push(c);
                i += 1;
            }
            if depth != 0 {
                break;
            }
            chunks.push(TemplateChunk::Expr(expr));
            i += 1;
            continue;
        }
        i += 1;
        if c == '\\' && i < chars.len() {
            if let Some(escaped) = read_escape(chars, &mut i)? {
                text.push(escaped);
            }
        } else {
            text.push(c);
        }
    }
    Err(ScriptError::syntax("unterminated template literal", chars[start].0))
}
