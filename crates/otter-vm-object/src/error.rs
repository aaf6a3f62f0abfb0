//! Object model error types

use crate::property::PropertyKey;
use crate::value::Value;
use thiserror::Error;

/// Errors raised by property, function and generator operations
#[derive(Debug, Error)]
pub enum ObjectError {
    /// Write to a non-writable data property or a proxy without a setter
    #[error("TypeError: Cannot assign to read only property '{0}'")]
    ImmutabilityViolation(PropertyKey),

    /// `call` on something that has no call behaviour
    #[error("TypeError: {0} is not a function")]
    NotCallable(String),

    /// `construct` on a function whose data forbids it
    #[error("TypeError: {0} is not a constructor")]
    NotConstructible(String),

    /// Generic type error
    #[error("TypeError: {0}")]
    TypeError(String),

    /// A second resume while the activation is still executing
    #[error("TypeError: Generator is already running")]
    GeneratorRunning,

    /// Resume of an activation that already returned or threw
    #[error("TypeError: Generator has already completed")]
    GeneratorCompleted,

    /// Rejected at `FunctionData` creation
    #[error("InternalError: invalid function data: {0}")]
    InvalidFunctionData(String),

    /// Call depth exceeded the realm limit
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// Value thrown by a compiled body
    #[error("Uncaught exception: {0:?}")]
    Exception(Box<Value>),
}

impl ObjectError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create an exception from a thrown value
    pub fn exception(value: Value) -> Self {
        Self::Exception(Box::new(value))
    }

    /// The thrown value, if this error carries one
    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            Self::Exception(value) => Some(value),
            _ => None,
        }
    }
}

impl From<String> for ObjectError {
    fn from(s: String) -> Self {
        ObjectError::type_error(s)
    }
}

impl From<&str> for ObjectError {
    fn from(s: &str) -> Self {
        ObjectError::type_error(s)
    }
}

/// Result type for object model operations
pub type ObjectResult<T> = std::result::Result<T, ObjectError>;
