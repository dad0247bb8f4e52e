//! Recursive-descent / precedence-climbing parser for the expression language.

use serde_json::Value;

use super::ast::{BinaryOp, Binding, Expr, LogicalOp, Stmt, TemplatePart, UnaryOp};
use super::lexer::{tokenize, Spanned, TemplateChunk, Token};
use crate::error::ScriptError;

const RESERVED: &[&str] = &[
    "if", "else", "for", "while", "do", "var", "let", "const", "break", "continue", "function",
    "return", "new", "class", "switch", "case", "with", "delete", "in", "of",
];

/// Deepest statement and expression nesting accepted, member chains included.
pub const MAX_DEPTH: usize = 128;

/// Longest run of operands joined by binary or logical operators at one level.
pub const MAX_CHAIN: usize = 4096;

/// Parse a statement list (a template body or an event script).
pub fn parse_program(src: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser::new(src)?;
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(body)
}

/// Parse a single expression. Trailing tokens are an error.
pub fn parse_expression(src: &str) -> Result<Expr, ScriptError> {
    Parser::new(src)?.whole_expression()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self, ScriptError> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
            depth: 0,
        })
    }

    fn whole_expression(&mut self) -> Result<Expr, ScriptError> {
        let expr = self.expression()?;
        self.eat_punct(";");
        if !self.at_eof() {
            return Err(self.unexpected());
        }
        Ok(expr)
    }

    fn too_deep(&self) -> ScriptError {
        ScriptError::syntax("too deeply nested", self.offset())
    }

    /// Run `parse` one nesting level down.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.too_deep());
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// `${…}` sources inside template literals parse at the enclosing depth.
    fn embedded(&mut self, src: &str) -> Result<Expr, ScriptError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.too_deep());
        }
        let mut inner = Parser::new(src)?;
        inner.depth = self.depth + 1;
        inner.whole_expression()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TOKEN CURSOR
    // ═══════════════════════════════════════════════════════════════════════════

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Token::Ident(n) if n == name)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(ScriptError::syntax(
                format!("expected `{p}`, found {}", describe(self.peek())),
                self.offset(),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            _ => Err(ScriptError::syntax(
                format!("expected identifier, found {}", describe(self.peek())),
                self.offset(),
            )),
        }
    }

    fn unexpected(&self) -> ScriptError {
        ScriptError::syntax(format!("unexpected {}", describe(self.peek())), self.offset())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        self.nested(Self::statement_at)
    }

    fn statement_at(&mut self) -> Result<Stmt, ScriptError> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_punct("{") {
            return self.block();
        }
        let keyword = match self.peek() {
            Token::Ident(name) => name.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "var" | "let" | "const" => {
                self.advance();
                let stmt = self.declarations()?;
                self.end_statement()?;
                Ok(stmt)
            }
            "if" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let consequent = Box::new(self.statement()?);
                let alternate = if self.is_ident("else") {
                    self.advance();
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    test,
                    consequent,
                    alternate,
                })
            }
            "for" => {
                self.advance();
                self.for_statement()
            }
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            "break" => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Break)
            }
            "continue" => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Continue)
            }
            "function" | "return" | "class" | "switch" | "do" | "with" | "new" | "delete" => Err(
                ScriptError::syntax(format!("`{keyword}` is not supported"), self.offset()),
            ),
            _ => {
                let expr = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Stmt, ScriptError> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(ScriptError::syntax("unclosed block", self.offset()));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(Stmt::Block(body))
    }

    /// A statement ends at `;`, before `}`, at end of input, or at a line break.
    fn end_statement(&mut self) -> Result<(), ScriptError> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() {
            return Ok(());
        }
        if self.tokens[self.pos].newline_before {
            return Ok(());
        }
        Err(self.unexpected())
    }

    fn binding(&mut self) -> Result<Binding, ScriptError> {
        if self.eat_punct("[") {
            let mut names = Vec::new();
            while !self.is_punct("]") {
                names.push(self.expect_ident()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("]")?;
            Ok(Binding::Array(names))
        } else {
            Ok(Binding::Name(self.expect_ident()?))
        }
    }

    fn declarations(&mut self) -> Result<Stmt, ScriptError> {
        let first = self.binding()?;
        self.declarations_from(first)
    }

    fn declarations_from(&mut self, first: Binding) -> Result<Stmt, ScriptError> {
        let mut decls = Vec::new();
        let mut binding = first;
        loop {
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push((binding, init));
            if !self.eat_punct(",") {
                break;
            }
            binding = self.binding()?;
        }
        Ok(Stmt::Declare(decls))
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.expect_punct("(")?;

        let declared = matches!(self.peek(), Token::Ident(k) if k == "var" || k == "let" || k == "const");
        let bare_loop_var = matches!(self.peek(), Token::Ident(n) if !RESERVED.contains(&n.as_str()))
            && matches!(self.peek_at(1), Token::Ident(k) if k == "of" || k == "in");

        let mut init = None;
        if declared || bare_loop_var {
            if declared {
                self.advance();
            }
            let binding = self.binding()?;
            if self.is_ident("of") || self.is_ident("in") {
                let is_of = self.is_ident("of");
                self.advance();
                let source = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(if is_of {
                    Stmt::ForOf {
                        binding,
                        iterable: source,
                        body,
                    }
                } else {
                    Stmt::ForIn {
                        binding,
                        object: source,
                        body,
                    }
                });
            }
            init = Some(Box::new(self.declarations_from(binding)?));
        } else if !self.is_punct(";") {
            init = Some(Box::new(Stmt::Expr(self.expression()?)));
        }
        self.expect_punct(";")?;

        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;

        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::assignment_at)
    }

    fn assignment_at(&mut self) -> Result<Expr, ScriptError> {
        let offset = self.offset();
        let target = self.conditional()?;
        let op = match self.peek() {
            Token::Punct("=") => None,
            Token::Punct("+=") => Some(BinaryOp::Add),
            Token::Punct("-=") => Some(BinaryOp::Sub),
            Token::Punct("*=") => Some(BinaryOp::Mul),
            Token::Punct("/=") => Some(BinaryOp::Div),
            Token::Punct("%=") => Some(BinaryOp::Rem),
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
            return Err(ScriptError::syntax("invalid assignment target", offset));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let test = self.binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ScriptError> {
        let mut left = self.unary()?;
        let mut operands = 1;
        loop {
            let Some((prec, op)) = infix_operator(self.peek()) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            operands += 1;
            if operands > MAX_CHAIN {
                return Err(ScriptError::syntax("operator chain too long", self.offset()));
            }
            self.advance();
            let right = self.binary(prec + 1)?;
            left = match op {
                Infix::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Infix::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            self.advance();
            let target = self.nested(Self::unary)?;
            return Ok(Expr::Update {
                target: Box::new(target),
                increment,
                prefix: true,
            });
        }
        let op = match self.peek() {
            Token::Punct("!") => UnaryOp::Not,
            Token::Punct("-") => UnaryOp::Neg,
            Token::Punct("+") => UnaryOp::Plus,
            Token::Ident(k) if k == "typeof" => UnaryOp::TypeOf,
            _ => return self.postfix(),
        };
        self.advance();
        let expr = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let expr = self.primary()?;
        let base = self.depth;
        let chain = self.postfix_chain(expr);
        self.depth = base;
        chain
    }

    /// Each member access, call or update nests the expression one level.
    fn postfix_chain(&mut self, mut expr: Expr) -> Result<Expr, ScriptError> {
        loop {
            let update = (self.is_punct("++") || self.is_punct("--"))
                && !self.tokens[self.pos].newline_before;
            let links = update
                || self.is_punct(".")
                || self.is_punct("?.")
                || self.is_punct("[")
                || self.is_punct("(");
            if !links {
                return Ok(expr);
            }
            if self.depth >= MAX_DEPTH {
                return Err(self.too_deep());
            }
            self.depth += 1;
            if self.eat_punct(".") {
                let name = self.property_name()?;
                expr = member(expr, Expr::Literal(Value::String(name)), false);
            } else if self.eat_punct("?.") {
                if self.eat_punct("[") {
                    let property = self.expression()?;
                    self.expect_punct("]")?;
                    expr = member(expr, property, true);
                } else if self.eat_punct("(") {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else {
                    let name = self.property_name()?;
                    expr = member(expr, Expr::Literal(Value::String(name)), true);
                }
            } else if self.eat_punct("[") {
                let property = self.expression()?;
                self.expect_punct("]")?;
                expr = member(expr, property, false);
            } else if self.eat_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else {
                let increment = self.is_punct("++");
                self.advance();
                expr = Expr::Update {
                    target: Box::new(expr),
                    increment,
                    prefix: false,
                };
            }
        }
    }

    fn property_name(&mut self) -> Result<String, ScriptError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(ScriptError::syntax(
                format!("expected property name, found {}", describe(&other)),
                self.offset(),
            )),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        while !self.is_punct(")") {
            args.push(self.assignment()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let offset = self.offset();
        match self.advance() {
            Token::Num(n) => Ok(Expr::Literal(super::value::number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Template(chunks) => {
                let mut parts = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    parts.push(match chunk {
                        TemplateChunk::Text(text) => TemplatePart::Text(text),
                        TemplateChunk::Expr(src) => TemplatePart::Expr(self.embedded(&src)?),
                    });
                }
                Ok(Expr::Template(parts))
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" | "NaN" => Ok(Expr::Literal(Value::Null)),
                _ if RESERVED.contains(&name.as_str()) => Err(ScriptError::syntax(
                    format!("unexpected keyword `{name}`"),
                    offset,
                )),
                _ => Ok(Expr::Ident(name)),
            },
            Token::Punct("(") => {
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                while !self.is_punct("]") {
                    items.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            Token::Punct("{") => {
                let mut entries = Vec::new();
                while !self.is_punct("}") {
                    let key_offset = self.offset();
                    let key = match self.advance() {
                        Token::Ident(name) => name,
                        Token::Str(s) => s,
                        Token::Num(n) => super::value::to_string(&super::value::number(n)),
                        other => {
                            return Err(ScriptError::syntax(
                                format!("invalid object key {}", describe(&other)),
                                key_offset,
                            ))
                        }
                    };
                    let value = if self.eat_punct(":") {
                        self.assignment()?
                    } else {
                        Expr::Ident(key.clone())
                    };
                    entries.push((key, value));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("}")?;
                Ok(Expr::Object(entries))
            }
            other => Err(ScriptError::syntax(
                format!("unexpected {}", describe(&other)),
                offset,
            )),
        }
    }
}

enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn infix_operator(token: &Token) -> Option<(u8, Infix)> {
    let Token::Punct(p) = token else {
        return None;
    };
    Some(match *p {
        "??" => (1, Infix::Logical(LogicalOp::Coalesce)),
        "||" => (2, Infix::Logical(LogicalOp::Or)),
        "&&" => (3, Infix::Logical(LogicalOp::And)),
        "==" => (6, Infix::Binary(BinaryOp::Eq)),
        "!=" => (6, Infix::Binary(BinaryOp::NotEq)),
        "===" => (6, Infix::Binary(BinaryOp::StrictEq)),
        "!==" => (6, Infix::Binary(BinaryOp::StrictNotEq)),
        "<" => (7, Infix::Binary(BinaryOp::Lt)),
        "<=" => (7, Infix::Binary(BinaryOp::LtEq)),
        ">" => (7, Infix::Binary(BinaryOp::Gt)),
        ">=" => (7, Infix::Binary(BinaryOp::GtEq)),
        "+" => (8, Infix::Binary(BinaryOp::Add)),
        "-" => (8, Infix::Binary(BinaryOp::Sub)),
        "*" => (9, Infix::Binary(BinaryOp::Mul)),
        "/" => (9, Infix::Binary(BinaryOp::Div)),
        "%" => (9, Infix::Binary(BinaryOp::Rem)),
        _ => return None,
    })
}

fn member(object: Expr, property: Expr, optional: bool) -> Expr {
    Expr::Member {
        object: Box::new(object),
        property: Box::new(property),
        optional,
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Num(n) => format!("number {n}"),
        Token::Str(s) => format!("string {s:?}"),
        Token::Template(_) => "template literal".to_string(),
        Token::Ident(name) => format!("`{name}`"),
        Token::Punct(p) => format!("`{p}`"),
        Token::Eof => "end of input".to_string(),
    }
}
