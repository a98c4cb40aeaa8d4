//! Human-readable diagnostic rendering (§6), grounded on `seqc`'s
//! `codespan`-free source-snippet printer: a plain `Display` impl plus a
//! hand-rolled caret line, no external diagnostics-rendering crate.

use limit_core::diagnostic::{Diagnostic, DiagnosticSink};
use std::io::Write;

/// Renders diagnostics to a writer using the template:
/// `error[E<code>][<kind>]: <message>`, a `--> file:line:col`, the source
/// line with a leading gutter, a caret line under the offending span, and
/// an optional `hint:`/`suggestion:` footer.
pub struct TextFormatter<W: Write> {
    out: W,
}

impl<W: Write> TextFormatter<W> {
    pub fn new(out: W) -> Self {
        TextFormatter { out }
    }
}

impl<W: Write> DiagnosticSink for TextFormatter<W> {
    fn report(&mut self, diagnostic: &Diagnostic, source: &str) {
        let _ = writeln!(
            self.out,
            "{}[E{}][{}]: {}",
            diagnostic.severity,
            diagnostic.full_code(),
            diagnostic.kind,
            diagnostic.message
        );
        let _ = writeln!(self.out, "  --> {}", diagnostic.location);

        if let Some(line) = source.lines().nth(diagnostic.location.line) {
            let gutter = format!("{}", diagnostic.location.line + 1);
            let _ = writeln!(self.out, "{gutter} | {line}");
            let pad = " ".repeat(gutter.len());
            let caret_offset = " ".repeat(diagnostic.location.column);
            let caret_len = diagnostic.location.len.max(1);
            let _ = writeln!(
                self.out,
                "{pad} | {caret_offset}{}",
                "^".repeat(caret_len)
            );
        }

        if let Some(hint) = &diagnostic.hint {
            let _ = writeln!(self.out, "  hint: {hint}");
        }
        if let Some(suggestion) = &diagnostic.suggestion {
            let _ = writeln!(self.out, "  suggestion: {suggestion}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limit_core::diagnostic::Phase;
    use limit_core::source::SourceLocation;

    #[test]
    fn renders_code_kind_message_and_caret() {
        let diagnostic = Diagnostic::new(
            Phase::Semantic,
            3,
            "UndefinedName",
            "undefined name `foo`",
            SourceLocation::new("test.lim".to_string(), 0, 4, 4, 3),
        )
        .with_hint("did you mean `foobar`?");

        let mut buf = Vec::new();
        {
            let mut formatter = TextFormatter::new(&mut buf);
            formatter.report(&diagnostic, "var x = foo;");
        }
        let rendered = String::from_utf8(buf).unwrap();
        assert!(rendered.contains("error[E303][UndefinedName]: undefined name `foo`"));
        assert!(rendered.contains("var x = foo;"));
        assert!(rendered.contains("^^^"));
        assert!(rendered.contains("hint: did you mean"));
    }
}
