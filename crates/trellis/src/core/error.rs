use std::result::Result as StdResult;

use thiserror::Error;

/// Result type for trellis operations.
pub type Result<T> = StdResult<T, Error>;

/// Parse error marker type.
#[derive(PartialEq, Eq, Error, Debug, Clone)]
#[error("{message}")]
pub struct ParseError {
    /// Parse error message, optionally including location.
    message: String,
}

impl ParseError {
    /// Construct a parse error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Construct a parse error with optional line/offset information.
    pub fn with_position(
        message: impl Into<String>,
        line: Option<usize>,
        offset: Option<usize>,
    ) -> Self {
        let message = message.into();
        let message = match (line, offset) {
            (Some(line), Some(offset)) => format!("{message} (line {line}, offset {offset})"),
            (Some(line), None) => format!("{message} (line {line})"),
            (None, Some(offset)) => format!("{message} (offset {offset})"),
            (None, None) => message,
        };
        Self { message }
    }
}

/// Core error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid name: {0}")]
    /// A plugin or handler name failed validation.
    InvalidName(String),

    #[error("'{kind}' specified for {id}. Expected 'function'")]
    /// A dynamic handler declaration carried something other than a function.
    NotCallable {
        /// Handler id, `plugin.function`.
        id: String,
        /// Kind of the value that was supplied instead.
        kind: String,
    },

    #[error("can't locate plugin: '{0}'")]
    /// Plugin lookup by name failed.
    UnknownPlugin(String),

    #[error("unknown data type: '{0}'")]
    /// Data type lookup by name failed.
    UnknownDataType(String),

    #[error("No registered plugins")]
    /// The union of all registered plugins was requested while none exist.
    NoRegisteredPlugins,

    #[error("plugin dependency cycle: {}", .0.join(" -> "))]
    /// Registering a plugin's dependencies led back to the plugin itself.
    DependencyCycle(Vec<String>),

    #[error("type reference cycle while resolving '{0}'")]
    /// A lazy type reference resolved back into itself.
    TypeCycle(String),

    #[error("Can't locate handler: '{id}', those are available: {}", .available.join(","))]
    /// Handler lookup by id failed.
    UnknownHandler {
        /// Requested handler id.
        id: String,
        /// Every registered handler id.
        available: Vec<String>,
    },

    #[error("invalid handler: {0}")]
    /// A handler target could not be interpreted.
    InvalidHandler(String),

    #[error("field '{field}' of {plugin} is reserved for base node state")]
    /// A plugin declared a field whose name collides with base node state.
    ReservedField {
        /// Plugin name.
        plugin: String,
        /// Offending field name.
        field: String,
    },

    #[error("unknown field '{field}' on {plugin}")]
    /// A field access named something the plugin does not declare.
    UnknownField {
        /// Plugin name.
        plugin: String,
        /// Requested field name.
        field: String,
    },

    #[error("unknown {member} '{name}' on {plugin}")]
    /// A view or action lookup failed.
    UnknownMember {
        /// Plugin name.
        plugin: String,
        /// Member category, `view` or `action`.
        member: &'static str,
        /// Requested member name.
        name: String,
    },

    #[error("error creating a '{plugin}' plugin instance: {message}")]
    /// Creation props did not satisfy the plugin's schema.
    InvalidProps {
        /// Plugin name.
        plugin: String,
        /// Description of the violation.
        message: String,
    },

    #[error("type mismatch: expected {expected}, got {got}")]
    /// A dynamic value did not have the expected shape.
    TypeMismatch {
        /// Expected type.
        expected: &'static str,
        /// Provided value kind.
        got: &'static str,
    },

    #[error("node is not alive")]
    /// The referenced node has been destroyed or never existed.
    NodeNotFound,

    #[error("Bad attrs {0}")]
    /// A style template carried an attrs function that is not a function.
    BadAttrs(String),

    #[error("parse error: {0}")]
    /// Parsing failure.
    Parse(#[source] ParseError),

    #[error("script run error: {0}")]
    /// Script execution failure.
    Script(String),

    #[error("error handling {event} event with '{handler}' on node {node}: {source}")]
    /// A plugin handler failed and no error handler claimed the failure.
    Handler {
        /// Display id of the node the handler ran against.
        node: String,
        /// Event name the handler was dispatched for.
        event: String,
        /// Handler id, `plugin.function`.
        handler: String,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },

    #[error("Error in tracked reaction {kind} '{name}': {source}")]
    /// A tracked reaction's observe or effect function failed.
    Reaction {
        /// Reaction name.
        name: String,
        /// Which half failed, `value` or `reaction`.
        kind: &'static str,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },

    #[error("reactions did not settle after {0} passes")]
    /// Reaction effects kept invalidating each other.
    ReactionLoop(usize),

    #[error("store is already borrowed")]
    /// A store access was attempted while the tree was mutably borrowed.
    Reentrant,

    #[error("{0}")]
    /// Failure returned from user-supplied code.
    Exec(#[from] anyhow::Error),

    #[error("internal: {0}")]
    /// Internal error.
    Internal(String),
}

impl Error {
    /// Recover a trellis error from an `anyhow` chain, wrapping foreign errors.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(err) => err,
            Err(err) => Self::Exec(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(ParseError::new(e.to_string()))
    }
}
