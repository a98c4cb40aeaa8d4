//! Bytecode virtual machine and structured-concurrency runtime for Limit.
//!
//! Grounded on `seq-runtime`'s split between a pure interpreter core
//! (`vm.rs`) and the ambient services around it (`scheduler.rs`,
//! `channel.rs`, `diagnostics.rs`), generalized from Seq's strand model to
//! Limit's `task`/`parallel`/`concurrent` forms (§4.6).

pub mod channel;
pub mod diagnostics;
pub mod error;
pub mod scheduler;
pub mod vm;

use error::RuntimeError;
use limit_compiler::bytecode::Chunk;
use limit_core::value::Value;
use std::rc::Rc;

/// Runs a compiled chunk to completion, installing the diagnostics signal
/// handler first. The single entry point `limit-cli` drives for `limit run`.
pub fn run(chunk: Chunk) -> Result<Value, RuntimeError> {
    scheduler::init();
    let mut machine = vm::Vm::new(Rc::new(chunk));
    machine.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use limit_compiler::config::CompilerConfig;

    #[test]
    fn run_executes_a_compiled_program() {
        let compiled = limit_compiler::compile("var x = 1 + 1;\nprint x;", "test.lim", &CompilerConfig::default()).expect("compiles");
        assert!(run(compiled.chunk).is_ok());
    }

    #[test]
    fn run_surfaces_an_uncaught_error_as_unhandled() {
        let compiled = limit_compiler::compile(
            r#"fn fail() -> Int throws Boom { return err Boom("nope"); }
               var x = fail()?;"#,
            "test.lim",
            &CompilerConfig::default(),
        )
        .expect("compiles");
        let result = run(compiled.chunk);
        assert!(matches!(result, Err(RuntimeError::Unhandled(_))));
    }
}
