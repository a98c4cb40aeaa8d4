//! Lexer: byte stream → token sequence, with optional trivia preservation
//! (§4.1).
//!
//! Deterministic, single-pass, single-threaded. The teacher (`seqc`) has
//! no separate lexer module — Seq's concatenative grammar tokenizes
//! inline inside the parser — so this module is new, written in the same
//! plain `match`-over-bytes idiom the teacher uses for its own character
//! scanning rather than pulling in a scanner-generator crate.

use limit_core::diagnostic::{Diagnostic, Phase};
use limit_core::source::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    Normal,
    Cst,
}

/// The closed set of token kinds, grouped by family per §3: literals,
/// identifiers/keywords, operators, punctuation, interpolation
/// delimiters, trivia, and end-of-file/error markers.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    BoolLiteral(bool),
    NilLiteral,
    Identifier(String),

    // Interpolation
    InterpolationStart,
    InterpolationEnd,

    // Keywords
    Var,
    Fn,
    Class,
    Type,
    Interface,
    Trait,
    Module,
    If,
    Else,
    While,
    For,
    Iter,
    In,
    Match,
    Return,
    Break,
    Continue,
    Attempt,
    Handle,
    Parallel,
    Concurrent,
    Task,
    Print,
    Import,
    Unsafe,
    Contract,
    Comptime,
    Throws,
    This,
    Show,
    Hide,
    As,
    Ok,
    Err,
    And,
    Or,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Not,
    Question,
    DotDot,
    Arrow,
    FatArrow,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Pipe,
    Underscore,

    // Annotations, e.g. `@public`
    Annotation(String),

    // Trivia
    Whitespace,
    Newline,
    LineComment(String),
    BlockComment(String),

    Eof,
}

impl TokenKind {
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::Newline | TokenKind::LineComment(_) | TokenKind::BlockComment(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub location: SourceLocation,
    pub leading_trivia: Vec<Token>,
    pub trailing_trivia: Vec<Token>,
}

impl Token {
    fn new(kind: TokenKind, lexeme: String, location: SourceLocation) -> Self {
        Token {
            kind,
            lexeme,
            location,
            leading_trivia: Vec::new(),
            trailing_trivia: Vec::new(),
        }
    }
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("var", TokenKind::Var),
    ("fn", TokenKind::Fn),
    ("class", TokenKind::Class),
    ("type", TokenKind::Type),
    ("interface", TokenKind::Interface),
    ("trait", TokenKind::Trait),
    ("module", TokenKind::Module),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("iter", TokenKind::Iter),
    ("in", TokenKind::In),
    ("match", TokenKind::Match),
    ("return", TokenKind::Return),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("attempt", TokenKind::Attempt),
    ("handle", TokenKind::Handle),
    ("parallel", TokenKind::Parallel),
    ("concurrent", TokenKind::Concurrent),
    ("task", TokenKind::Task),
    ("print", TokenKind::Print),
    ("import", TokenKind::Import),
    ("unsafe", TokenKind::Unsafe),
    ("contract", TokenKind::Contract),
    ("comptime", TokenKind::Comptime),
    ("throws", TokenKind::Throws),
    ("this", TokenKind::This),
    ("self", TokenKind::This),
    ("show", TokenKind::Show),
    ("hide", TokenKind::Hide),
    ("as", TokenKind::As),
    ("ok", TokenKind::Ok),
    ("err", TokenKind::Err),
    ("true", TokenKind::BoolLiteral(true)),
    ("false", TokenKind::BoolLiteral(false)),
    ("nil", TokenKind::NilLiteral),
    ("and", TokenKind::And),
    ("or", TokenKind::Or),
];

/// Scanning mode for the top of the interpolation/brace-nesting stack.
/// `StringBody` means "resume accumulating string text"; `Expr(depth)`
/// means "scan ordinary tokens, tracking brace nesting so we can tell a
/// dict-literal `}` from the `}` that closes the interpolation" (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    StringBody(u8),
    Expr(u32),
}

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
    file: String,
    mode: LexMode,
    diagnostics: Vec<Diagnostic>,
    stack: Vec<Mode>,
    /// Set right after a string-prefix token is emitted for an
    /// interpolation; the next call to `next_raw_token` must emit
    /// `InterpolationStart` before resuming ordinary scanning.
    pending_interp_start: Option<(usize, usize, usize)>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, file: impl Into<String>, mode: LexMode) -> Self {
        Lexer {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 0,
            column: 0,
            file: file.into(),
            mode,
            diagnostics: Vec::new(),
            stack: Vec::new(),
            pending_interp_start: None,
        }
    }

    pub fn scan(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_raw_token();
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        let tokens = if self.mode == LexMode::Cst {
            tokens
        } else {
            attach_leading_trivia(tokens)
        };
        (tokens, self.diagnostics)
    }

    fn loc(&self, start: usize, start_line: usize, start_col: usize) -> SourceLocation {
        SourceLocation::new(self.file.clone(), start_line, start_col, start, self.pos - start)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn next_raw_token(&mut self) -> Token {
        if let Some((s, sl, sc)) = self.pending_interp_start.take() {
            return Token::new(TokenKind::InterpolationStart, String::new(), self.loc(s, sl, sc));
        }
        match self.stack.last().copied() {
            Some(Mode::StringBody(quote)) => self.scan_string_body(quote),
            _ => self.scan_normal_token(),
        }
    }

    fn scan_normal_token(&mut self) -> Token {
        let start = self.pos;
        let start_line = self.line;
        let start_col = self.column;

        let Some(b) = self.peek() else {
            return Token::new(TokenKind::Eof, String::new(), self.loc(start, start_line, start_col));
        };

        if b == b'\n' {
            self.advance();
            return self.finish(TokenKind::Newline, start, start_line, start_col);
        }
        if b == b' ' || b == b'\t' || b == b'\r' {
            while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\r')) {
                self.advance();
            }
            return self.finish(TokenKind::Whitespace, start, start_line, start_col);
        }
        if b == b'/' && self.peek_at(1) == Some(b'/') {
            while !matches!(self.peek(), None | Some(b'\n')) {
                self.advance();
            }
            let text = self.source[start..self.pos].to_string();
            return self.finish(TokenKind::LineComment(text), start, start_line, start_col);
        }
        if b == b'/' && self.peek_at(1) == Some(b'*') {
            self.advance();
            self.advance();
            let mut depth = 1usize;
            while depth > 0 {
                match self.peek() {
                    None => {
                        self.diagnostics.push(
                            Diagnostic::new(
                                Phase::Lexical,
                                2,
                                "UnterminatedComment",
                                "unterminated block comment",
                                self.loc(start, start_line, start_col),
                            )
                            .with_hint("add a closing */"),
                        );
                        break;
                    }
                    Some(b'*') if self.peek_at(1) == Some(b'/') => {
                        self.advance();
                        self.advance();
                        depth -= 1;
                    }
                    Some(b'/') if self.peek_at(1) == Some(b'*') => {
                        self.advance();
                        self.advance();
                        depth += 1;
                    }
                    _ => {
                        self.advance();
                    }
                }
            }
            let text = self.source[start..self.pos].to_string();
            return self.finish(TokenKind::BlockComment(text), start, start_line, start_col);
        }
        if b == b'"' || b == b'\'' {
            self.advance();
            self.stack.push(Mode::StringBody(b));
            return self.scan_string_body(b);
        }
        if b.is_ascii_digit() {
            return self.scan_number(start, start_line, start_col);
        }
        if b == b'_' && !self.peek_at(1).is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
            self.advance();
            return self.finish(TokenKind::Underscore, start, start_line, start_col);
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.advance();
            }
            let text = &self.source[start..self.pos];
            for (kw, kind) in KEYWORDS {
                if *kw == text {
                    return self.finish(kind.clone(), start, start_line, start_col);
                }
            }
            return self.finish(TokenKind::Identifier(text.to_string()), start, start_line, start_col);
        }
        if b == b'@' {
            self.advance();
            let name_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.advance();
            }
            let text = self.source[name_start..self.pos].to_string();
            return self.finish(TokenKind::Annotation(text), start, start_line, start_col);
        }

        self.advance();
        let kind = match b {
            b'+' if self.matches(b'=') => TokenKind::PlusAssign,
            b'+' => TokenKind::Plus,
            b'-' if self.matches(b'=') => TokenKind::MinusAssign,
            b'-' if self.matches(b'>') => TokenKind::Arrow,
            b'-' => TokenKind::Minus,
            b'*' if self.matches(b'*') => TokenKind::StarStar,
            b'*' if self.matches(b'=') => TokenKind::StarAssign,
            b'*' => TokenKind::Star,
            b'/' if self.matches(b'=') => TokenKind::SlashAssign,
            b'/' => TokenKind::Slash,
            b'%' if self.matches(b'=') => TokenKind::PercentAssign,
            b'%' => TokenKind::Percent,
            b'=' if self.matches(b'=') => TokenKind::EqEq,
            b'=' if self.matches(b'>') => TokenKind::FatArrow,
            b'=' => TokenKind::Assign,
            b'!' if self.matches(b'=') => TokenKind::NotEq,
            b'!' => TokenKind::Not,
            b'<' if self.matches(b'=') => TokenKind::LtEq,
            b'<' => TokenKind::Lt,
            b'>' if self.matches(b'=') => TokenKind::GtEq,
            b'>' => TokenKind::Gt,
            b'.' if self.peek() == Some(b'.') => {
                self.advance();
                TokenKind::DotDot
            }
            b'.' => TokenKind::Dot,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => {
                if let Some(Mode::Expr(depth)) = self.stack.last_mut() {
                    *depth += 1;
                }
                TokenKind::LBrace
            }
            b'}' => {
                match self.stack.last_mut() {
                    Some(Mode::Expr(depth)) if *depth > 0 => {
                        *depth -= 1;
                        TokenKind::RBrace
                    }
                    Some(Mode::Expr(_)) => {
                        self.stack.pop();
                        return self.finish(TokenKind::InterpolationEnd, start, start_line, start_col);
                    }
                    _ => TokenKind::RBrace,
                }
            }
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b';' => TokenKind::Semicolon,
            b'?' => TokenKind::Question,
            b'|' => TokenKind::Pipe,
            other => {
                self.diagnostics.push(Diagnostic::new(
                    Phase::Lexical,
                    1,
                    "UnexpectedCharacter",
                    format!("unexpected character {:?}", other as char),
                    self.loc(start, start_line, start_col),
                ));
                TokenKind::Whitespace
            }
        };
        self.finish(kind, start, start_line, start_col)
    }

    fn scan_number(&mut self, start: usize, start_line: usize, start_col: usize) -> Token {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let mut is_float = false;
        // A `.` starts a fractional part only when followed by a digit;
        // `1..3` must lex as Int(1), DotDot, Int(3), not a malformed float.
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = &self.source[start..self.pos];
        let kind = if is_float {
            TokenKind::FloatLiteral(text.parse().unwrap_or(0.0))
        } else {
            TokenKind::IntLiteral(text.parse().unwrap_or(0))
        };
        self.finish(kind, start, start_line, start_col)
    }

    /// Resume accumulating a string literal's text (§4.1). On an
    /// unescaped `{`, stops and schedules `InterpolationStart` to be
    /// emitted on the following call, leaving `Mode::Expr(0)` on top of
    /// the stack so ordinary tokens are scanned for the embedded
    /// expression until the matching `}`.
    fn scan_string_body(&mut self, quote: u8) -> Token {
        let start = self.pos;
        let start_line = self.line;
        let start_col = self.column;
        let mut buf = String::new();
        loop {
            match self.peek() {
                None => {
                    self.diagnostics.push(
                        Diagnostic::new(
                            Phase::Lexical,
                            3,
                            "UnterminatedString",
                            "unterminated string literal",
                            self.loc(start, start_line, start_col),
                        )
                        .with_hint("add a closing quote"),
                    );
                    self.stack.pop();
                    return self.finish(TokenKind::StringLiteral(buf), start, start_line, start_col);
                }
                Some(b) if b == quote => {
                    self.advance();
                    self.stack.pop();
                    return self.finish(TokenKind::StringLiteral(buf), start, start_line, start_col);
                }
                Some(b'\\') => {
                    self.advance();
                    match self.advance() {
                        Some(b'n') => buf.push('\n'),
                        Some(b't') => buf.push('\t'),
                        Some(b'r') => buf.push('\r'),
                        Some(b'\\') => buf.push('\\'),
                        Some(b'"') => buf.push('"'),
                        Some(b'\'') => buf.push('\''),
                        Some(b'{') => buf.push('{'),
                        Some(b'}') => buf.push('}'),
                        Some(other) => buf.push(other as char),
                        None => {
                            self.diagnostics.push(Diagnostic::new(
                                Phase::Lexical,
                                3,
                                "UnterminatedString",
                                "unterminated string literal",
                                self.loc(start, start_line, start_col),
                            ));
                            self.stack.pop();
                            return self.finish(TokenKind::StringLiteral(buf), start, start_line, start_col);
                        }
                    }
                }
                Some(b'{') => {
                    let interp_start = self.pos;
                    let interp_line = self.line;
                    let interp_col = self.column;
                    self.advance();
                    self.stack.push(Mode::Expr(0));
                    self.pending_interp_start = Some((interp_start, interp_line, interp_col));
                    return self.finish(TokenKind::StringLiteral(buf), start, start_line, start_col);
                }
                Some(c) => {
                    self.advance();
                    buf.push(c as char);
                }
            }
        }
    }

    fn finish(&mut self, kind: TokenKind, start: usize, start_line: usize, start_col: usize) -> Token {
        let lexeme = self.source[start..self.pos].to_string();
        Token::new(kind, lexeme, self.loc(start, start_line, start_col))
    }
}

/// In `Normal` mode, strip trivia tokens out of the stream, attaching
/// each run as leading trivia on the following significant token (§3's
/// CST/AST distinction: `Normal` mode discards trivia entirely for the
/// parser's AST needs, but we still group it here in case a caller wants
/// comments without full CST fidelity).
fn attach_leading_trivia(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::new();
    let mut pending_leading: Vec<Token> = Vec::new();
    for tok in tokens {
        if tok.kind.is_trivia() {
            pending_leading.push(tok);
            continue;
        }
        let mut tok = tok;
        tok.leading_trivia = std::mem::take(&mut pending_leading);
        out.push(tok);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, diags) = Lexer::new(src, "test.lm", LexMode::Normal).scan();
        assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn range_operator_not_confused_with_float() {
        let k = kinds("1..3");
        assert_eq!(
            k,
            vec![TokenKind::IntLiteral(1), TokenKind::DotDot, TokenKind::IntLiteral(3), TokenKind::Eof]
        );
    }

    #[test]
    fn float_literal_requires_digit_after_dot() {
        let k = kinds("1.5");
        assert_eq!(k, vec![TokenKind::FloatLiteral(1.5), TokenKind::Eof]);
    }

    #[test]
    fn simple_string_literal() {
        let k = kinds("\"hello\"");
        assert_eq!(k, vec![TokenKind::StringLiteral("hello".into()), TokenKind::Eof]);
    }

    #[test]
    fn string_interpolation_produces_flat_stream() {
        let k = kinds("\"a {x} b\"");
        assert_eq!(
            k,
            vec![
                TokenKind::StringLiteral("a ".into()),
                TokenKind::InterpolationStart,
                TokenKind::Identifier("x".into()),
                TokenKind::InterpolationEnd,
                TokenKind::StringLiteral(" b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn nested_dict_literal_inside_interpolation_does_not_close_early() {
        let k = kinds("\"v={ {\"a\": 1}[\"a\"] }\"");
        // The inner `{...}` dict literal braces must not be mistaken for
        // the interpolation's closing brace.
        assert!(k.contains(&TokenKind::InterpolationStart));
        assert!(k.contains(&TokenKind::InterpolationEnd));
        assert_eq!(k.iter().filter(|t| **t == TokenKind::LBrace).count(), 1);
        assert_eq!(k.iter().filter(|t| **t == TokenKind::RBrace).count(), 1);
    }

    #[test]
    fn unterminated_string_reports_diagnostic_at_opening_delimiter() {
        let (_tokens, diags) = Lexer::new("\"abc", "test.lm", LexMode::Normal).scan();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, "UnterminatedString");
        assert_eq!(diags[0].location.offset, 0);
    }

    #[test]
    fn block_comments_nest() {
        let (tokens, diags) = Lexer::new("/* outer /* inner */ still outer */ 1", "t.lm", LexMode::Cst).scan();
        assert!(diags.is_empty());
        assert!(tokens.iter().any(|t| matches!(t.kind, TokenKind::IntLiteral(1))));
    }

    #[test]
    fn cst_mode_preserves_every_trivia_token() {
        let src = "var  x = 1; // hi\n";
        let (tokens, _) = Lexer::new(src, "t.lm", LexMode::Cst).scan();
        let reconstructed: String = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(reconstructed, src);
    }
}
