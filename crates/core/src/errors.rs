use thiserror::Error;

use crate::domain::call::{CallId, FunctionErrorKind};
use crate::domain::function::ArgumentViolation;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("module name must not be empty")]
    EmptyModuleName,
    #[error("module `{module}` declares a function with an empty name")]
    EmptyFunctionName { module: String },
    #[error("module `{module}` declares function `{function}` more than once")]
    DuplicateFunction { module: String, function: String },
}

/// Startup and session-resolution failures. None of these are recoverable
/// inside a session.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("configuration failure: {0}")]
    Config(String),
    #[error("module `{name}` not found in registry (available: {})", available.join(", "))]
    ModuleNotFound { name: String, available: Vec<String> },
    #[error("module `{0}` is already registered")]
    DuplicateModule(String),
    #[error("factory for `{registered_as}` produced module named `{actual}`")]
    NameMismatch { registered_as: String, actual: String },
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Failures at the dispatch boundary. They are converted into result content
/// for the model and never surface to the session caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FunctionError {
    #[error("unknown function `{function}`")]
    UnknownFunction { function: String },
    #[error("invalid arguments for `{function}`: {}", render_violations(violations))]
    InvalidArguments { function: String, violations: Vec<ArgumentViolation> },
    #[error("{message}")]
    DomainExecution { message: String },
    #[error("call id `{}` was already consumed in this turn", call_id.0)]
    DuplicateCall { call_id: CallId },
}

impl FunctionError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::DomainExecution { message: message.into() }
    }

    pub fn unknown(function: impl Into<String>) -> Self {
        Self::UnknownFunction { function: function.into() }
    }

    pub fn kind(&self) -> FunctionErrorKind {
        match self {
            Self::UnknownFunction { .. } => FunctionErrorKind::UnknownFunction,
            Self::InvalidArguments { .. } => FunctionErrorKind::InvalidArguments,
            Self::DomainExecution { .. } => FunctionErrorKind::DomainExecution,
            Self::DuplicateCall { .. } => FunctionErrorKind::DuplicateCall,
        }
    }
}

fn render_violations(violations: &[ArgumentViolation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
