//! Runtime error taxonomy: failures the VM raises itself, as opposed to
//! `Value::Error`s a Limit program constructs with `err(...)` (§4.5, §7).
//!
//! Grounded on `seqc::codegen::CodeGenError`'s hand-rolled enum-plus-manual-
//! `Display`-plus-`std::error::Error` shape, generalized from a single
//! code-generation failure mode to the VM's wider set of fatal conditions.

use limit_core::source::SourceLocation;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    DivisionByZero(SourceLocation),
    IndexOutOfBounds { index: i64, len: usize, location: SourceLocation },
    KeyNotFound(SourceLocation),
    TypeConversion { from: &'static str, to: &'static str, location: SourceLocation },
    IteratorExhausted(SourceLocation),
    StackUnderflow,
    UnknownGlobal(String),
    NotCallable(&'static str),
    ArityMismatch { expected: usize, got: usize },
    ChannelClosed,
    Cancelled,
    /// A `Value::Error` that escaped `main` uncaught (§6's exit-code 2 case).
    Unhandled(limit_core::value::ErrorValue),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::DivisionByZero(loc) => write!(f, "{loc}: division by zero"),
            RuntimeError::IndexOutOfBounds { index, len, location } => {
                write!(f, "{location}: index {index} out of bounds for length {len}")
            }
            RuntimeError::KeyNotFound(loc) => write!(f, "{loc}: key not found"),
            RuntimeError::TypeConversion { from, to, location } => {
                write!(f, "{location}: cannot convert {from} to {to}")
            }
            RuntimeError::IteratorExhausted(loc) => write!(f, "{loc}: iterator exhausted"),
            RuntimeError::StackUnderflow => write!(f, "internal error: operand stack underflow"),
            RuntimeError::UnknownGlobal(name) => write!(f, "unknown global `{name}`"),
            RuntimeError::NotCallable(type_tag) => write!(f, "value of type {type_tag} is not callable"),
            RuntimeError::ArityMismatch { expected, got } => {
                write!(f, "expected {expected} arguments, got {got}")
            }
            RuntimeError::ChannelClosed => write!(f, "operation on a closed channel"),
            RuntimeError::Cancelled => write!(f, "task cancelled"),
            RuntimeError::Unhandled(e) => write!(f, "unhandled error: {e}"),
        }
    }
}

impl std::error::Error for RuntimeError {}
