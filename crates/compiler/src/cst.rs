//! Concrete syntax tree: a trivia-preserving, grammar-agnostic bracket
//! tree over the raw [`Lexer`] output in [`LexMode::Cst`].
//!
//! The teacher has no CST layer (Seq's LLVM backend only ever needs the
//! AST), so this is grounded instead on the lexer's own token-stream
//! model: every token the lexer produces, trivia included, appears in
//! the tree exactly once, and nodes nest by paren/brace/bracket matching
//! so [`CstNode::reconstruct_source`] is a pure concatenation of leaf
//! lexemes in source order (§8 testable property: round-trip source
//! preservation). The tree does not mirror the statement/expression
//! grammar the parser implements against the non-trivia token stream —
//! it only needs to prove that no byte of the original source was lost.

use crate::lexer::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CstKind {
    Root,
    Paren,
    Brace,
    Bracket,
    Interpolation,
    /// Unmatched delimiters at end of input, or a stray closer with no
    /// opener; wraps whatever tokens remain so the tree still reconstructs.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CstElement {
    Node(CstNode),
    Token(Token),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CstNode {
    pub kind: CstKind,
    pub children: Vec<CstElement>,
}

impl CstNode {
    pub fn reconstruct_source(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        for child in &self.children {
            match child {
                CstElement::Token(t) => out.push_str(&t.lexeme),
                CstElement::Node(n) => n.write_into(out),
            }
        }
    }

    /// Every token from the original stream, in order, trivia included.
    pub fn leaf_tokens(&self) -> Vec<&Token> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Token>) {
        for child in &self.children {
            match child {
                CstElement::Token(t) => out.push(t),
                CstElement::Node(n) => n.collect_leaves(out),
            }
        }
    }
}

/// Builds the bracket-nested CST from a flat Cst-mode token stream
/// (trivia included, `Eof` included as the final leaf).
pub fn build_cst(tokens: Vec<Token>) -> CstNode {
    let mut stack: Vec<(CstKind, Vec<CstElement>)> = vec![(CstKind::Root, Vec::new())];

    for token in tokens {
        match &token.kind {
            TokenKind::LParen => {
                stack.push((CstKind::Paren, Vec::new()));
                stack.last_mut().unwrap().1.push(CstElement::Token(token));
            }
            TokenKind::LBrace => {
                stack.push((CstKind::Brace, Vec::new()));
                stack.last_mut().unwrap().1.push(CstElement::Token(token));
            }
            TokenKind::LBracket => {
                stack.push((CstKind::Bracket, Vec::new()));
                stack.last_mut().unwrap().1.push(CstElement::Token(token));
            }
            TokenKind::InterpolationStart => {
                stack.push((CstKind::Interpolation, Vec::new()));
                stack.last_mut().unwrap().1.push(CstElement::Token(token));
            }
            TokenKind::RParen if matches!(stack.last(), Some((CstKind::Paren, _))) => {
                close_group(&mut stack, token);
            }
            TokenKind::RBrace if matches!(stack.last(), Some((CstKind::Brace, _))) => {
                close_group(&mut stack, token);
            }
            TokenKind::RBracket if matches!(stack.last(), Some((CstKind::Bracket, _))) => {
                close_group(&mut stack, token);
            }
            TokenKind::InterpolationEnd
                if matches!(stack.last(), Some((CstKind::Interpolation, _))) =>
            {
                close_group(&mut stack, token);
            }
            // Any other closer with no matching opener on top: push it
            // into the current frame as a plain leaf so nothing is lost,
            // the unmatched-delimiter diagnostic was already reported by
            // the parser pass over the non-trivia stream.
            _ => {
                stack.last_mut().unwrap().1.push(CstElement::Token(token));
            }
        }
    }

    // Unwind any still-open groups (unterminated input) into Error nodes.
    while stack.len() > 1 {
        let (kind, children) = stack.pop().unwrap();
        let node = CstNode {
            kind: CstKind::Error,
            children,
        };
        let _ = kind;
        stack.last_mut().unwrap().1.push(CstElement::Node(node));
    }

    let (_, children) = stack.pop().unwrap();
    CstNode {
        kind: CstKind::Root,
        children,
    }
}

fn close_group(stack: &mut Vec<(CstKind, Vec<CstElement>)>, closer: Token) {
    let (kind, mut children) = stack.pop().unwrap();
    children.push(CstElement::Token(closer));
    let node = CstNode { kind, children };
    stack.last_mut().unwrap().1.push(CstElement::Node(node));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{LexMode, Lexer};

    fn cst_for(source: &str) -> CstNode {
        let (tokens, diagnostics) = Lexer::new(source, "test.lim", LexMode::Cst).scan();
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
        build_cst(tokens)
    }

    #[test]
    fn reconstructs_exact_source_with_trivia() {
        let source = "fn add(a, b) {\n  // sum\n  return a + b;\n}\n";
        let root = cst_for(source);
        assert_eq!(root.reconstruct_source(), source);
    }

    #[test]
    fn nested_brackets_form_nested_nodes() {
        let root = cst_for("var x = [1, (2 + 3), {4: 5}];");
        // Exactly one Bracket, one Paren, one Brace child node somewhere.
        let mut kinds = Vec::new();
        fn walk(node: &CstNode, kinds: &mut Vec<CstKind>) {
            kinds.push(node.kind);
            for c in &node.children {
                if let CstElement::Node(n) = c {
                    walk(n, kinds);
                }
            }
        }
        walk(&root, &mut kinds);
        assert!(kinds.contains(&CstKind::Bracket));
        assert!(kinds.contains(&CstKind::Paren));
        assert!(kinds.contains(&CstKind::Brace));
    }

    #[test]
    fn interpolation_braces_do_not_collide_with_dict_braces() {
        let source = r#"print "{1 + len({"a": 1})}";"#;
        let root = cst_for(source);
        assert_eq!(root.reconstruct_source(), source);
    }

    #[test]
    fn unterminated_group_wraps_remainder_as_error() {
        let root = cst_for("var x = (1 + 2;");
        assert_eq!(root.reconstruct_source(), "var x = (1 + 2;");
    }
}
