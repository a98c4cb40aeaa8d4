//! Limit CLI
//!
//! Command-line driver for the Limit compiler and virtual machine (§6).
//! Thin by design: every subcommand parses arguments, calls into
//! `limit-compiler`/`limit-runtime`, and renders the result. No pipeline
//! logic lives here.

use clap::{Parser as ClapParser, Subcommand};
use limit_compiler::config::CompilerConfig;
use limit_compiler::diagnostics::TextFormatter;
use limit_core::diagnostic::{Diagnostic, DiagnosticSink};
use limit_runtime::error::RuntimeError;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "limit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Limit compiler and virtual machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a .lim file
    Run {
        /// Input .lim source file
        input: PathBuf,
    },

    /// Print the token stream for a .lim file
    Tokens {
        /// Input .lim source file
        input: PathBuf,
    },

    /// Print the parsed AST for a .lim file
    Ast {
        /// Input .lim source file
        input: PathBuf,
    },

    /// Print the compiled bytecode for a .lim file
    Bytecode {
        /// Input .lim source file
        input: PathBuf,
    },

    /// Start an interactive read-eval-print loop
    Repl,
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run { input } => run_file(&input),
        Commands::Tokens { input } => print_tokens(&input),
        Commands::Ast { input } => print_ast(&input),
        Commands::Bytecode { input } => print_bytecode(&input),
        Commands::Repl => run_repl(),
    };

    process::exit(code);
}

fn read_source(path: &Path) -> Result<String, i32> {
    fs::read_to_string(path).map_err(|e| {
        eprintln!("error: could not read {}: {e}", path.display());
        2
    })
}

fn report_diagnostics(diagnostics: &[Diagnostic], source: &str) {
    let mut formatter = TextFormatter::new(io::stderr());
    for diagnostic in diagnostics {
        formatter.report(diagnostic, source);
    }
}

fn run_file(input: &Path) -> i32 {
    let source = match read_source(input) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let file = input.display().to_string();
    let config = CompilerConfig::default();

    let compiled = match limit_compiler::compile(&source, &file, &config) {
        Ok(c) => c,
        Err(diagnostics) => {
            report_diagnostics(&diagnostics, &source);
            return 1;
        }
    };

    match limit_runtime::run(compiled.chunk) {
        Ok(_) => 0,
        Err(RuntimeError::Unhandled(e)) => {
            eprintln!("error: unhandled error: {e}");
            1
        }
        Err(RuntimeError::StackUnderflow | RuntimeError::UnknownGlobal(_) | RuntimeError::NotCallable(_)) => {
            eprintln!("internal error: the compiled program violated a VM invariant");
            2
        }
        Err(other) => {
            eprintln!("error: {other}");
            1
        }
    }
}

fn print_tokens(input: &Path) -> i32 {
    use limit_compiler::lexer::{LexMode, Lexer};

    let source = match read_source(input) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let file = input.display().to_string();
    let (tokens, diagnostics) = Lexer::new(&source, file, LexMode::Normal).scan();

    for token in &tokens {
        println!("{:?} {:?} @ {}", token.kind, token.lexeme, token.location);
    }

    if diagnostics.iter().any(|d| d.severity == limit_core::diagnostic::Severity::Error) {
        report_diagnostics(&diagnostics, &source);
        return 1;
    }
    0
}

fn print_ast(input: &Path) -> i32 {
    let source = match read_source(input) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let file = input.display().to_string();
    let parsed = limit_compiler::parser::parse_source(&source, &file);

    println!("{:#?}", parsed.program);

    if parsed.diagnostics.iter().any(|d| d.severity == limit_core::diagnostic::Severity::Error) {
        report_diagnostics(&parsed.diagnostics, &source);
        return 1;
    }
    0
}

fn print_bytecode(input: &Path) -> i32 {
    let source = match read_source(input) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let file = input.display().to_string();
    let config = CompilerConfig::default();

    match limit_compiler::compile(&source, &file, &config) {
        Ok(compiled) => {
            for (i, function) in compiled.chunk.functions.iter().enumerate() {
                println!("fn[{i}] {} ({} params, {} locals)", function.name, function.param_count, function.local_count);
                for (ip, instruction) in function.code.iter().enumerate() {
                    println!("  {ip:4}: {:?}", instruction.op);
                }
            }
            for (i, class) in compiled.chunk.classes.iter().enumerate() {
                println!("class[{i}] {} fields={:?} ctor=fn[{}]", class.name, class.field_names, class.constructor);
            }
            for (i, module) in compiled.chunk.modules.iter().enumerate() {
                println!("module[{i}] {} <- {}", module.path.join("."), module.source_file);
            }
            0
        }
        Err(diagnostics) => {
            report_diagnostics(&diagnostics, &source);
            1
        }
    }
}

/// A line-oriented REPL: each line is compiled and run as its own
/// top-level program. There is no cross-line state -- every `var` a line
/// declares is scoped to that line alone, the same "evaluate, don't
/// accumulate" simplicity as piping a script through `limit run` one
/// statement at a time.
fn run_repl() -> i32 {
    let config = CompilerConfig::default();
    let stdin = io::stdin();
    print!("limit> ");
    let _ = io::stdout().flush();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            print!("limit> ");
            let _ = io::stdout().flush();
            continue;
        }
        if trimmed == ":quit" || trimmed == ":q" {
            break;
        }

        match limit_compiler::compile(&line, "<repl>", &config) {
            Ok(compiled) => match limit_runtime::run(compiled.chunk) {
                Ok(value) => println!("{value}"),
                Err(e) => eprintln!("error: {e}"),
            },
            Err(diagnostics) => report_diagnostics(&diagnostics, &line),
        }

        print!("limit> ");
        let _ = io::stdout().flush();
    }
    println!();
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        write!(file, "{contents}").expect("write temp file");
        file
    }

    #[test]
    fn run_file_returns_zero_for_a_well_formed_program() {
        let file = write_temp("var x = 1 + 2;\nprint x;");
        assert_eq!(run_file(file.path()), 0);
    }

    #[test]
    fn run_file_returns_one_for_a_type_error() {
        let file = write_temp("var x: Int = \"nope\";");
        assert_eq!(run_file(file.path()), 1);
    }

    #[test]
    fn run_file_returns_two_for_an_unreadable_path() {
        assert_eq!(run_file(Path::new("/nonexistent/does-not-exist.lim")), 2);
    }

    #[test]
    fn print_bytecode_returns_zero_for_a_well_formed_program() {
        let file = write_temp("var x = 1 + 2;\nprint x;");
        assert_eq!(print_bytecode(file.path()), 0);
    }

    #[test]
    fn print_tokens_returns_zero_for_a_well_formed_program() {
        let file = write_temp("var x = 1;");
        assert_eq!(print_tokens(file.path()), 0);
    }

    #[test]
    fn print_ast_returns_zero_for_a_well_formed_program() {
        let file = write_temp("var x = 1;");
        assert_eq!(print_ast(file.path()), 0);
    }
}
