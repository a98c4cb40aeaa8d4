//! Source locations shared by tokens, syntax tree nodes, and diagnostics.

use std::fmt;

/// A location in a single source file.
///
/// Grounded on the teacher's `seqc::ast::SourceLocation`: 0-indexed line
/// numbers (so LSP-style tooling can use them directly) with an inclusive
/// `start_line..=end_line` span, plus the byte offset and column needed for
/// caret-underlined diagnostics (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    /// Start line, 0-indexed.
    pub line: usize,
    /// Start column, 0-indexed, in bytes from the start of the line.
    pub column: usize,
    /// Byte offset from the start of the file.
    pub offset: usize,
    /// Length in bytes of the spanned lexeme.
    pub len: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize, offset: usize, len: usize) -> Self {
        SourceLocation {
            file: file.into(),
            line,
            column,
            offset,
            len,
        }
    }

    /// A placeholder location for synthesized nodes (e.g. auto-wrapped
    /// `ok(v)` returns) that have no direct source span.
    pub fn synthetic() -> Self {
        SourceLocation {
            file: String::new(),
            line: 0,
            column: 0,
            offset: 0,
            len: 0,
        }
    }

    pub fn end_offset(&self) -> usize {
        self.offset + self.len
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line + 1, self.column + 1)
    }
}
