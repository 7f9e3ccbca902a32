//! Error taxonomy for the bridge
//!
//! Every failure the bridge can surface to the host lands in [`BridgeError`].
//! Failures raised inside script code, or raised by host code during a
//! script-to-host call, reach the host as [`ScriptError`].

use crate::value::TypeTag;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error returned by [`Interpreter`](crate::Interpreter) operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// The engine could not allocate a new interpreter instance.
    #[error("cannot create interpreter instance: out of memory")]
    OutOfMemory,

    /// The instance was closed; no further operations are possible.
    #[error("interpreter instance is closed")]
    Closed,

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Bind(#[from] BindError),

    /// The engine rejected an operation outside of script execution.
    #[error("engine failure: {0}")]
    Engine(String),
}

/// A script-level failure: syntax error, thrown value, or runtime fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ScriptError {
    message: String,
    file_name: Option<String>,
    line: Option<u32>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file_name: None,
            line: None,
        }
    }

    /// Attach the file name the failing source was evaluated under.
    pub fn in_file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Attach the 1-based source line of the failure.
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        match (&self.file_name, self.line) {
            (Some(file), Some(line)) => write!(f, " ({file}:{line})"),
            (Some(file), None) => write!(f, " ({file})"),
            (None, Some(line)) => write!(f, " (line {line})"),
            (None, None) => Ok(()),
        }
    }
}

/// Reasons a capability binding is rejected. Checked in declaration order,
/// before anything is installed into the script namespace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("global name must not be empty")]
    InvalidName,

    #[error("only interfaces can be bound, received '{type_name}'")]
    NotACapability { type_name: String },

    #[error("'{type_name}' must not extend other capability types (extends {extends:?})")]
    NotFlat {
        type_name: String,
        extends: Vec<String>,
    },

    #[error("host object is not an instance of '{type_name}'")]
    NotSatisfied { type_name: String },

    #[error("return type {type_tag} on {method} is not supported")]
    UnsupportedReturn { method: String, type_tag: TypeTag },

    #[error("parameter type {type_tag} on {method} is not supported")]
    UnsupportedParameter { method: String, type_tag: TypeTag },

    #[error("{method} is overloaded in '{type_name}'")]
    Overloaded { type_name: String, method: String },
}

/// Failure reported by a bound host method.
///
/// Host methods return this to signal a fault; the dispatcher re-throws it
/// into the script as a catchable error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Failures of a single script-to-host call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown global '{name}'")]
    UnknownGlobal { name: String },

    #[error("'{global}' has no method at index {index}")]
    UnknownMethod { global: String, index: usize },

    #[error("{method} expects {expected} argument(s), received {given}")]
    Arity {
        method: String,
        expected: usize,
        given: usize,
    },

    #[error("argument {index} of {method} must be {expected}, received {found}")]
    TypeMismatch {
        method: String,
        index: usize,
        expected: TypeTag,
        found: String,
    },

    #[error("{method} failed: {message}")]
    HostFault { method: String, message: String },
}

/// Errors loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
