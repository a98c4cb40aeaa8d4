//! Front end and bytecode compiler for Limit (§4).
//!
//! The pipeline is lexer → parser (CST + AST) → name resolution / type
//! checking → bytecode compiler, grounded on `seqc`'s own
//! `lex -> parse -> typecheck -> codegen` driver shape in `seqc::main`
//! and `seqc::pipeline`, generalized from Seq's single-pass compile to
//! Limit's richer checked-then-lowered pipeline.

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod cst;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod typechecker;

use bytecode::Chunk;
use config::CompilerConfig;
use limit_core::diagnostic::{Diagnostic, Severity};

/// The result of a full front-end run: the parser's CST (for tooling that
/// wants exact-source reconstruction) alongside the checked program.
pub struct CompileResult {
    pub chunk: Chunk,
    pub cst: cst::CstNode,
}

/// Runs the complete pipeline over `source` and lowers it to bytecode.
///
/// Parse errors and type errors are both collected before returning;
/// compilation proceeds to the bytecode stage only if no diagnostic at
/// `Severity::Error` was produced; warnings and hints do not block it.
pub fn compile(source: &str, file: &str, config: &CompilerConfig) -> Result<CompileResult, Vec<Diagnostic>> {
    let parsed = parser::parse_source(source, file);
    let mut diagnostics = parsed.diagnostics;
    diagnostics.extend(typechecker::check_program(&parsed.program, config));

    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        return Err(diagnostics);
    }

    let chunk = compiler::compile_program(&parsed.program, config);
    Ok(CompileResult {
        chunk,
        cst: parsed.cst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_source_compiles_to_a_chunk() {
        let result = compile("var x = 1 + 2;\nprint x;", "test.lim", &CompilerConfig::default());
        assert!(result.is_ok());
    }

    #[test]
    fn type_errors_prevent_bytecode_emission() {
        let result = compile("var x: Int = \"not an int\";", "test.lim", &CompilerConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn parse_errors_are_reported_without_panicking() {
        let result = compile("var x = ;", "test.lim", &CompilerConfig::default());
        assert!(result.is_err());
    }
}
