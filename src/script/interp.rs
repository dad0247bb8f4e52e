//! Tree-walking interpreter for parsed statements and expressions.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::ast::{BinaryOp, Binding, Expr, LogicalOp, Stmt, TemplatePart, UnaryOp};
use super::builtins;
use super::value::{self, number, to_number, to_string};
use super::Scope;
use crate::error::ScriptError;

/// Upper bound on loop iterations and calls for a single run.
pub const STEP_LIMIT: usize = 1_000_000;

/// How far past the end an array may be grown by a single index assignment.
pub const MAX_ARRAY_GAP: usize = 1 << 16;

enum Flow {
    Normal,
    Break,
    Continue,
}

pub(crate) struct Interpreter<'a> {
    frames: Vec<Map<String, Value>>,
    data: Cow<'a, Map<String, Value>>,
    scope: Scope<'a>,
    steps: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(scope: Scope<'a>, locals: Map<String, Value>) -> Self {
        Self {
            frames: vec![locals],
            data: Cow::Borrowed(scope.data),
            scope,
            steps: 0,
        }
    }

    /// The outermost local frame, after a run.
    pub fn into_parts(mut self) -> (Map<String, Value>, Option<Map<String, Value>>) {
        let locals = self.frames.swap_remove(0);
        let data = match self.data {
            Cow::Owned(data) => Some(data),
            Cow::Borrowed(_) => None,
        };
        (locals, data)
    }

    pub fn run(&mut self, body: &[Stmt]) -> Result<(), ScriptError> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                Flow::Break | Flow::Continue => {
                    return Err(ScriptError::syntax("break/continue outside of a loop", 0))
                }
            }
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > STEP_LIMIT {
            return Err(ScriptError::StepLimit(STEP_LIMIT));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn exec_scoped(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        self.frames.push(Map::new());
        let result = self.exec_all(stmts);
        self.frames.pop();
        result
    }

    fn exec_all(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        match stmt {
            Stmt::Empty => Ok(Flow::Normal),
            Stmt::Expr(Expr::Assign { target, op, value }) => {
                self.eval_assign(target, *op, value, false)?;
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Declare(decls) => {
                for (binding, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr)?,
                        None => Value::Null,
                    };
                    self.bind(binding, value);
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(body) => self.exec_scoped(body),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if value::is_truthy(&self.eval(test)?) {
                    self.exec(consequent)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                self.frames.push(Map::new());
                let result = self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body);
                self.frames.pop();
                result
            }
            Stmt::ForOf {
                binding,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable)? {
                    Value::Array(items) => items,
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => {
                        return Err(ScriptError::Type(format!(
                            "{} is not iterable",
                            value::type_of(&other)
                        )))
                    }
                };
                self.exec_each(binding, items, body)
            }
            Stmt::ForIn {
                binding,
                object,
                body,
            } => {
                let keys = match self.eval(object)? {
                    Value::Object(map) => map.keys().cloned().map(Value::String).collect(),
                    Value::Array(items) => (0..items.len()).map(|i| Value::String(i.to_string())).collect(),
                    Value::String(s) => (0..s.chars().count()).map(|i| Value::String(i.to_string())).collect(),
                    _ => Vec::new(),
                };
                self.exec_each(binding, keys, body)
            }
            Stmt::While { test, body } => {
                while value::is_truthy(&self.eval(test)?) {
                    self.tick()?;
                    match self.exec(body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Result<Flow, ScriptError> {
        if let Some(init) = init {
            self.exec(init)?;
        }
        loop {
            if let Some(test) = test {
                if !value::is_truthy(&self.eval(test)?) {
                    break;
                }
            }
            self.tick()?;
            if let Flow::Break = self.exec(body)? {
                break;
            }
            if let Some(update) = update {
                self.eval(update)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_each(&mut self, binding: &Binding, items: Vec<Value>, body: &Stmt) -> Result<Flow, ScriptError> {
        for item in items {
            self.tick()?;
            self.frames.push(Map::new());
            self.bind(binding, item);
            let flow = self.exec(body);
            self.frames.pop();
            if let Flow::Break = flow? {
                break;
            }
        }
        Ok(Flow::Normal)
    }

    fn bind(&mut self, binding: &Binding, value: Value) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        match binding {
            Binding::Name(name) => {
                frame.insert(name.clone(), value);
            }
            Binding::Array(names) => {
                let items = match value {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                for (i, name) in names.iter().enumerate() {
                    frame.insert(name.clone(), items.get(i).cloned().unwrap_or(Value::Null));
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // NAME RESOLUTION
    // ═══════════════════════════════════════════════════════════════════════════

    fn data_visible(&self, name: &str) -> bool {
        self.scope.implicit && self.scope.shadow != Some(name) && self.data.contains_key(name)
    }

    fn is_bound(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.contains_key(name))
            || self.data_visible(name)
            || self.scope.imports.is_some_and(|i| i.contains_key(name))
            || self.scope.globals.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(value) = self.frames.iter().rev().find_map(|f| f.get(name)) {
            return Ok(value.clone());
        }
        if self.data_visible(name) {
            return Ok(self.data[name].clone());
        }
        if let Some(value) = self.scope.imports.and_then(|i| i.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.scope.globals.get(name) {
            return Ok(value.clone());
        }
        match name {
            "window" | "globalThis" => Ok(Value::Object(self.scope.globals.clone())),
            // A shadowed name reads the global slot, which may simply be unset
            _ if self.scope.shadow == Some(name) => Ok(Value::Null),
            _ => Err(ScriptError::Reference(name.to_string())),
        }
    }

    /// Mutable slot for a root identifier, creating a top-level local when unbound.
    fn slot_mut(&mut self, name: &str) -> &mut Value {
        if let Some(idx) = self.frames.iter().rposition(|f| f.contains_key(name)) {
            return self.frames[idx].entry(name.to_string()).or_insert(Value::Null);
        }
        if self.data_visible(name) {
            return self.data.to_mut().entry(name.to_string()).or_insert(Value::Null);
        }
        self.frames[0].entry(name.to_string()).or_insert(Value::Null)
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), ScriptError> {
        match target {
            Expr::Ident(name) => {
                *self.slot_mut(name) = value;
                Ok(())
            }
            Expr::Member { .. } => {
                let mut keys = Vec::new();
                let mut base = target;
                while let Expr::Member { object, property, .. } = base {
                    keys.push(self.eval(property)?);
                    base = object;
                }
                let Expr::Ident(root) = base else {
                    return Err(ScriptError::Type("invalid assignment target".to_string()));
                };
                keys.reverse();
                let slot = self.slot_mut(root);
                assign_path(slot, &keys, value)
            }
            _ => Err(ScriptError::Type("invalid assignment target".to_string())),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => self.lookup(name),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::Array(out))
            }
            Expr::Object(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let value = self.eval(value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => out.push_str(&to_string(&self.eval(expr)?)),
                    }
                }
                Ok(Value::String(out))
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                if let Expr::Ident(ns) = object.as_ref() {
                    if builtins::is_namespace(ns) && !self.is_bound(ns) {
                        let key = to_string(&self.eval(property)?);
                        return builtins::namespace_property(ns, &key)
                            .ok_or_else(|| ScriptError::Reference(format!("{ns}.{key}")));
                    }
                }
                let target = self.eval(object)?;
                let key = self.eval(property)?;
                if target.is_null() {
                    if *optional {
                        return Ok(Value::Null);
                    }
                    return Err(ScriptError::Type(format!(
                        "Cannot read properties of null (reading '{}')",
                        to_string(&key)
                    )));
                }
                Ok(get_member(&target, &key))
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.call(callee, args, *optional),
            Expr::Unary { op, expr } => match op {
                UnaryOp::TypeOf => {
                    if let Expr::Ident(name) = expr.as_ref() {
                        if !self.is_bound(name) && !builtins::is_namespace(name) {
                            return Ok(Value::String("undefined".to_string()));
                        }
                    }
                    Ok(Value::String(value::type_of(&self.eval(expr)?).to_string()))
                }
                UnaryOp::Not => Ok(Value::Bool(!value::is_truthy(&self.eval(expr)?))),
                UnaryOp::Neg => Ok(number(-to_number(&self.eval(expr)?))),
                UnaryOp::Plus => Ok(number(to_number(&self.eval(expr)?))),
            },
            Expr::Update {
                target,
                increment,
                prefix,
            } => {
                let old = to_number(&self.eval(target)?);
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign(target, number(new))?;
                Ok(number(if *prefix { new } else { old }))
            }
            // Operator chains lean left; fold them along the spine instead of recursing.
            Expr::Binary { .. } => {
                let mut spine = Vec::new();
                let mut base = expr;
                while let Expr::Binary { op, left, right } = base {
                    spine.push((*op, &**right));
                    base = &**left;
                }
                let mut acc = self.eval(base)?;
                for (op, right) in spine.into_iter().rev() {
                    let right = self.eval(right)?;
                    acc = binary(op, &acc, &right)?;
                }
                Ok(acc)
            }
            Expr::Logical { .. } => {
                let mut spine = Vec::new();
                let mut base = expr;
                while let Expr::Logical { op, left, right } = base {
                    spine.push((*op, &**right));
                    base = &**left;
                }
                let mut acc = self.eval(base)?;
                for (op, right) in spine.into_iter().rev() {
                    let short_circuit = match op {
                        LogicalOp::And => !value::is_truthy(&acc),
                        LogicalOp::Or => value::is_truthy(&acc),
                        LogicalOp::Coalesce => !acc.is_null(),
                    };
                    if !short_circuit {
                        acc = self.eval(right)?;
                    }
                }
                Ok(acc)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if value::is_truthy(&self.eval(test)?) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Assign { target, op, value } => self.eval_assign(target, *op, value, true),
        }
    }

    /// `keep` is false at statement level, where the result is discarded and a string
    /// accumulator can be appended to without copying it back out.
    fn eval_assign(
        &mut self,
        target: &Expr,
        op: Option<BinaryOp>,
        source: &Expr,
        keep: bool,
    ) -> Result<Value, ScriptError> {
        let rhs = self.eval(source)?;
        let result = match op {
            None => rhs,
            Some(BinaryOp::Add) => {
                if let Expr::Ident(name) = target {
                    if self.is_bound(name) {
                        if let Value::String(acc) = self.slot_mut(name) {
                            let tail = to_string(&rhs);
                            if acc.len() + tail.len() > builtins::MAX_STRING_LENGTH {
                                return Err(ScriptError::Range("Invalid string length".to_string()));
                            }
                            acc.push_str(&tail);
                            return Ok(if keep { Value::String(acc.clone()) } else { Value::Null });
                        }
                    }
                }
                binary(BinaryOp::Add, &self.eval(target)?, &rhs)?
            }
            Some(op) => binary(op, &self.eval(target)?, &rhs)?,
        };
        self.assign(target, result.clone())?;
        Ok(result)
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], optional: bool) -> Result<Value, ScriptError> {
        self.tick()?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }

        match callee {
            Expr::Ident(name) => {
                if name == "print" && self.frames[0].contains_key("__p") {
                    let text: String = values.iter().map(to_string).collect();
                    if let Some(Value::String(acc)) = self.frames[0].get_mut("__p") {
                        acc.push_str(&text);
                    }
                    return Ok(Value::Null);
                }
                if let Some(result) = self.scope.functions.call(name, &values, &self.data) {
                    return result;
                }
                if !self.is_bound(name) {
                    if let Some(result) = builtins::call_global(name, &values) {
                        return result;
                    }
                    return Err(ScriptError::Reference(name.clone()));
                }
                if optional && self.lookup(name)?.is_null() {
                    return Ok(Value::Null);
                }
                Err(ScriptError::NotCallable(name.clone()))
            }
            Expr::Member {
                object, property, ..
            } => {
                let method = to_string(&self.eval(property)?);
                if let Expr::Ident(ns) = object.as_ref() {
                    if builtins::is_namespace(ns) && !self.is_bound(ns) {
                        return builtins::call_namespace(ns, &method, &values)
                            .unwrap_or_else(|| Err(ScriptError::NotCallable(format!("{ns}.{method}"))));
                    }
                }
                let receiver = self.eval(object)?;
                if receiver.is_null() && optional {
                    return Ok(Value::Null);
                }
                builtins::call_method(&receiver, &method, &values)
                    .unwrap_or_else(|| Err(ScriptError::NotCallable(method)))
            }
            _ => Err(ScriptError::NotCallable("expression".to_string())),
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let arithmetic = |f: fn(f64, f64) -> f64| number(f(to_number(left), to_number(right)));
    let ordered = |accept: fn(Ordering) -> bool| {
        Value::Bool(value::compare(left, right).is_some_and(accept))
    };
    let result = match op {
        BinaryOp::Add => {
            let sum = value::add(left, right);
            if matches!(&sum, Value::String(s) if s.len() > builtins::MAX_STRING_LENGTH) {
                return Err(ScriptError::Range("Invalid string length".to_string()));
            }
            sum
        }
        BinaryOp::Sub => arithmetic(|a, b| a - b),
        BinaryOp::Mul => arithmetic(|a, b| a * b),
        BinaryOp::Div => arithmetic(|a, b| a / b),
        BinaryOp::Rem => arithmetic(|a, b| a % b),
        BinaryOp::Eq => Value::Bool(value::loose_equals(left, right)),
        BinaryOp::NotEq => Value::Bool(!value::loose_equals(left, right)),
        BinaryOp::StrictEq => Value::Bool(value::strict_equals(left, right)),
        BinaryOp::StrictNotEq => Value::Bool(!value::strict_equals(left, right)),
        BinaryOp::Lt => ordered(|o| o == Ordering::Less),
        BinaryOp::LtEq => ordered(|o| o != Ordering::Greater),
        BinaryOp::Gt => ordered(|o| o == Ordering::Greater),
        BinaryOp::GtEq => ordered(|o| o != Ordering::Less),
    };
    Ok(result)
}

fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) => n.as_u64().map(|i| i as usize),
        Value::String(s) => s.parse::<usize>().ok(),
        _ => None,
    }
}

pub(crate) fn get_member(target: &Value, key: &Value) -> Value {
    let name = to_string(key);
    match target {
        Value::Object(map) => map.get(&name).cloned().unwrap_or(Value::Null),
        Value::Array(items) => {
            if name == "length" {
                return number(items.len() as f64);
            }
            array_index(key)
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null)
        }
        Value::String(s) => {
            if name == "length" {
                return number(s.chars().count() as f64);
            }
            array_index(key)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

fn assign_path(slot: &mut Value, keys: &[Value], value: Value) -> Result<(), ScriptError> {
    let Some((last, parents)) = keys.split_last() else {
        *slot = value;
        return Ok(());
    };
    let mut current = slot;
    for key in parents {
        current = match current {
            Value::Object(map) => map
                .entry(to_string(key))
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let idx = array_index(key)
                    .filter(|i| *i < items.len())
                    .ok_or_else(|| ScriptError::Type(format!("no element at {}", to_string(key))))?;
                &mut items[idx]
            }
            other => {
                return Err(ScriptError::Type(format!(
                    "Cannot set properties of {}",
                    value::type_of(other)
                )))
            }
        };
    }
    match current {
        Value::Object(map) => {
            map.insert(to_string(last), value);
            Ok(())
        }
        Value::Array(items) => match array_index(last) {
            Some(i) if i < items.len() => {
                items[i] = value;
                Ok(())
            }
            Some(i) if i - items.len() > MAX_ARRAY_GAP => Err(ScriptError::Range(format!(
                "index {i} is too far past the end of an array of length {}",
                items.len()
            ))),
            Some(i) => {
                items.resize(i, Value::Null);
                items.push(value);
                Ok(())
            }
            None => Err(ScriptError::Type(format!("invalid array index {}", to_string(last)))),
        },
        other => Err(ScriptError::Type(format!(
            "Cannot set properties of {}",
            value::type_of(other)
        ))),
    }
}
