//! Compiler-wide configuration, grounded on `seqc`'s `CompilerOptions`
//! (module search path, optimization toggles) plus the limits §4.2/§4.4
//! name explicitly: the parser's error cap and the `parallel` default
//! worker count the bytecode compiler bakes into `BEGIN_PARALLEL` when a
//! program doesn't specify `cores:`.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Directories searched, in order, when resolving `import a.b.c`.
    pub module_search_path: Vec<PathBuf>,
    /// Parser error cap before aborting (§4.2).
    pub max_diagnostics: usize,
    /// `parallel` worker count when no `cores:` option is given; `None`
    /// means "ask the runtime for `available_parallelism` at run time".
    pub default_parallel_workers: Option<usize>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            module_search_path: vec![PathBuf::from(".")],
            max_diagnostics: 20,
            default_parallel_workers: None,
        }
    }
}

impl CompilerConfig {
    pub fn with_search_path(mut self, paths: Vec<PathBuf>) -> Self {
        self.module_search_path = paths;
        self
    }
}

/// Resolves a dotted `import a.b.c` path against a module search path,
/// trying each directory in order and appending the `.lim` extension.
/// Shared by the type checker (which validates imports) and the bytecode
/// compiler (which inlines them), so both phases agree on which file an
/// import names.
pub fn resolve_module_path(search_path: &[PathBuf], path: &[String]) -> Option<PathBuf> {
    let relative: PathBuf = path.iter().collect();
    for dir in search_path {
        let candidate = dir.join(&relative).with_extension("lim");
        if candidate.is_file() {
            return Some(std::fs::canonicalize(&candidate).unwrap_or(candidate));
        }
    }
    None
}
