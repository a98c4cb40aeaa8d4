//! Structured diagnostics and the formatter trait the core invokes.
//!
//! The lexer, parser, type checker, and VM all produce [`Diagnostic`]
//! values rather than formatted strings; a [`DiagnosticSink`] renders them
//! (§6's `error[E<code>][<kind>]: ...` template). Keeping the data and the
//! rendering separate is what lets tooling (LSP, tests) consume diagnostics
//! structurally instead of scraping text.

use crate::source::SourceLocation;
use std::fmt;

/// Which pipeline stage produced a diagnostic. Drives the `E1xx`..`E4xx`
/// error code grouping from §6/§7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lexical,
    Parse,
    Semantic,
    Runtime,
}

impl Phase {
    pub fn code_prefix(self) -> u32 {
        match self {
            Phase::Lexical => 100,
            Phase::Parse => 200,
            Phase::Semantic => 300,
            Phase::Runtime => 400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Hint,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Hint => write!(f, "hint"),
        }
    }
}

/// A single structured diagnostic.
///
/// `code` is the numeric suffix within a phase (e.g. `3` for
/// `UndefinedName` under `Semantic` renders as `E303`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub phase: Phase,
    pub code: u32,
    pub kind: String,
    pub severity: Severity,
    pub message: String,
    pub location: SourceLocation,
    pub hint: Option<String>,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn new(
        phase: Phase,
        code: u32,
        kind: impl Into<String>,
        message: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Diagnostic {
            phase,
            code,
            kind: kind.into(),
            severity: Severity::Error,
            message: message.into(),
            location,
            hint: None,
            suggestion: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn full_code(&self) -> u32 {
        self.phase.code_prefix() + self.code
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[E{}][{}]: {} --> {}",
            self.severity,
            self.full_code(),
            self.kind,
            self.message,
            self.location
        )
    }
}

impl std::error::Error for Diagnostic {}

/// Narrow trait the core invokes to render diagnostics against a source
/// buffer. Implemented by `limit_compiler::diagnostics::TextFormatter` for
/// the §6 human-readable template; test harnesses can implement it to
/// collect structured diagnostics instead.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: &Diagnostic, source: &str);
}

/// A sink that simply collects diagnostics in order, useful for tests and
/// for any caller that wants the structured data instead of rendered text.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink for CollectingSink {
    fn report(&mut self, diagnostic: &Diagnostic, _source: &str) {
        self.diagnostics.push(diagnostic.clone());
    }
}
