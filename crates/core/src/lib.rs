//! Limit Core: value, type, and diagnostic primitives shared by the
//! compiler and the virtual machine.
//!
//! Mirrors the split of a Forth-style `seq-core` crate (`Value`, by-value
//! key equality, channel handles) but generalized to Limit's full value
//! model: fixed-width integers, error-union values, class instances, and
//! structured-concurrency handles.
//!
//! # Modules
//!
//! - `source`: source locations shared by tokens, CST/AST nodes, and types.
//! - `diagnostic`: the `Diagnostic` type and `DiagnosticSink` trait the
//!   lexer, parser, type checker, and VM all report through.
//! - `types`: the type descriptor lattice (§3 of the specification).
//! - `value`: the runtime `Value` enum and by-value dict-key equality.

pub mod diagnostic;
pub mod source;
pub mod types;
pub mod value;

pub use diagnostic::{Diagnostic, DiagnosticSink, Phase, Severity};
pub use source::SourceLocation;
pub use types::{FieldType, FunctionParam, Type, TypeTable};
pub use value::{ErrorValue, Value, ValueKey};
