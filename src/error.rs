//! Error taxonomy for component registration, compilation and rendering.

use thiserror::Error;

pub type Result<T, E = ComponentError> = std::result::Result<T, E>;

/// Failures raised while lexing, parsing or evaluating the expression language.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { message: String, offset: usize },

    #[error("{0} is not defined")]
    Reference(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("{0} is not a function")]
    NotCallable(String),

    #[error("script exceeded {0} evaluation steps")]
    StepLimit(usize),

    #[error("range error: {0}")]
    Range(String),
}

impl ScriptError {
    pub(crate) fn syntax(message: impl Into<String>, offset: usize) -> Self {
        ScriptError::Syntax {
            message: message.into(),
            offset,
        }
    }
}

/// Failures raised while compiling a template string into a render function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("Invalid `variable` option passed into template: {0:?}")]
    InvalidVariable(String),

    #[error("invalid delimiter pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("template body does not compile: {0}")]
    Syntax(#[source] ScriptError),
}

/// Network failures of the fetch capability.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("{url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url}: {reason}")]
    Network { url: String, reason: String },

    #[error("{url}: response is not JSON: {reason}")]
    Body { url: String, reason: String },
}

/// An external script or stylesheet failed to load.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("resource {url} failed to load: {reason}")]
pub struct ResourceLoadError {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("invalid custom element name {0:?}")]
    InvalidName(String),

    #[error("<{0}> is not a defined component")]
    UndefinedElement(String),

    #[error("template for <{name}> does not compile: {source}")]
    Compile {
        name: String,
        #[source]
        source: TemplateError,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("cannot parse {name}:{type_name} from {raw:?}: {reason}")]
    Parse {
        name: String,
        type_name: String,
        raw: String,
        reason: String,
    },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    ResourceLoad(#[from] ResourceLoadError),

    #[error("{kind} {name:?} is already registered")]
    Duplicate { kind: &'static str, name: String },

    #[error("declaration is missing a $name attribute")]
    MissingName,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("event loop is shut down")]
    Spawn,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
