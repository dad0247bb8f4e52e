//! Sandboxed expression language.
//!
//! Templates, `js`-typed attributes and event scripts are author-supplied code. Instead of a
//! general-purpose engine they run through a small JavaScript-subset interpreter working on
//! `serde_json::Value`s, with name lookup made explicit:
//!
//! 1. local frames (`var`/`let`/`const`, loop bindings)
//! 2. the data context, when opened (implicit binding mode)
//! 3. template imports
//! 4. the global table (`window` / `globalThis` expose it whole)
//!
//! Anything else is a `ReferenceError`. Calls resolve through the [`Functions`] supplied by the
//! caller and then a fixed allow-list of built-ins.

mod ast;
mod builtins;
mod interp;
mod lexer;
mod parser;
pub mod value;

use serde_json::{Map, Value};

use crate::error::ScriptError;

pub use builtins::json_stringify;
pub use interp::STEP_LIMIT;

/// Functions provided by the embedding code (block templates, the attribute helper,
/// `update` inside event scripts). Return `None` for names you do not handle.
pub trait Functions {
    fn call(&self, name: &str, args: &[Value], data: &Map<String, Value>) -> Option<Result<Value, ScriptError>>;
}

pub struct NoFunctions;

impl Functions for NoFunctions {
    fn call(&self, _: &str, _: &[Value], _: &Map<String, Value>) -> Option<Result<Value, ScriptError>> {
        None
    }
}

/// Everything a script can see besides its own locals.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub data: &'a Map<String, Value>,
    /// Open `data` keys as bare identifiers.
    pub implicit: bool,
    /// A name that skips the data context and resolves from the global table instead.
    pub shadow: Option<&'a str>,
    pub imports: Option<&'a Map<String, Value>>,
    pub globals: &'a Map<String, Value>,
    pub functions: &'a dyn Functions,
}

impl<'a> Scope<'a> {
    pub fn new(data: &'a Map<String, Value>, globals: &'a Map<String, Value>) -> Self {
        Self {
            data,
            implicit: true,
            shadow: None,
            imports: None,
            globals,
            functions: &NoFunctions,
        }
    }

    pub fn shadowing(mut self, name: &'a str) -> Self {
        self.shadow = Some(name);
        self
    }

    pub fn with_functions(mut self, functions: &'a dyn Functions) -> Self {
        self.functions = functions;
        self
    }
}

/// Result of running a statement list.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Top-level locals after the run, including names first assigned without a declaration.
    pub locals: Map<String, Value>,
    /// The data context, when the script wrote into it.
    pub data: Option<Map<String, Value>>,
}

/// A parsed statement list, reusable across runs.
#[derive(Debug, Clone)]
pub struct Program {
    body: Vec<ast::Stmt>,
}

impl Program {
    pub fn parse(source: &str) -> Result<Self, ScriptError> {
        Ok(Self {
            body: parser::parse_program(source)?,
        })
    }

    pub fn run(&self, scope: Scope<'_>, locals: Map<String, Value>) -> Result<Outcome, ScriptError> {
        let mut interp = interp::Interpreter::new(scope, locals);
        interp.run(&self.body)?;
        let (locals, data) = interp.into_parts();
        Ok(Outcome { locals, data })
    }
}

/// Evaluates author-supplied code against a scope.
///
/// [`SandboxEvaluator`] is the default. Plugging in a full language engine is an explicit trust
/// decision made by the embedder.
pub trait Evaluate {
    fn evaluate(&self, source: &str, scope: Scope<'_>) -> Result<Value, ScriptError>;

    fn execute(&self, source: &str, scope: Scope<'_>, locals: Map<String, Value>) -> Result<Outcome, ScriptError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SandboxEvaluator;

impl Evaluate for SandboxEvaluator {
    fn evaluate(&self, source: &str, scope: Scope<'_>) -> Result<Value, ScriptError> {
        let expr = parser::parse_expression(source)?;
        interp::Interpreter::new(scope, Map::new()).eval(&expr)
    }

    fn execute(&self, source: &str, scope: Scope<'_>, locals: Map<String, Value>) -> Result<Outcome, ScriptError> {
        Program::parse(source)?.run(scope, locals)
    }
}
