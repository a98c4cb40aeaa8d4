//! End-to-end compile tests over small whole programs (§8's scenarios
//! (a)-(f)), exercised through the public `limit_compiler::compile` entry
//! point the CLI itself calls, rather than probing the lexer/parser/type
//! checker in isolation the way the crate's inline `#[cfg(test)]` modules
//! do. Grounded on the teacher's own split between fast inline unit tests
//! and slower whole-pipeline `tests/` suites.

use limit_compiler::compile;
use limit_compiler::config::CompilerConfig;
use std::io::Write;

fn compiles_cleanly(source: &str) {
    let result = compile(source, "golden.lim", &CompilerConfig::default());
    assert!(result.is_ok(), "expected clean compile, got {:?}", result.err());
}

// (a) if/else branches on a plain comparison.
#[test]
fn scenario_a_if_else_branches_compile_cleanly() {
    compiles_cleanly(
        r#"var x = 10;
           var y = 20;
           if (x > y) { print "a"; }
           if (x < y) { print "b"; }"#,
    );
}

// (b) nested `iter` loops with string interpolation.
#[test]
fn scenario_b_nested_iter_with_interpolation_compiles_cleanly() {
    compiles_cleanly(
        r#"iter (i in 1..3) {
             iter (j in 10..13) {
               print "{i},{j}";
             }
           }"#,
    );
}

// (c) an error-union function consumed via `?else` from another failable
// function. `?`/`?else` require their enclosing function to itself be
// failable (see `check_error_propagate_inner`), so the propagation has to
// happen inside `safeDivide` rather than at top level.
#[test]
fn scenario_c_error_propagate_else_handler_compiles_cleanly() {
    compiles_cleanly(
        r#"fn divide(a: Int, b: Int) -> Int throws DivByZero {
             if (b == 0) { return err DivByZero; }
             return ok(a / b);
           }
           fn safeDivide(a: Int, b: Int) -> Int throws DivByZero {
             var r = divide(a, b) ? else { print "failed"; return 0; };
             return r;
           }"#,
    );
}

// (e) dict literal, read-modify-write through an index, print.
#[test]
fn scenario_e_dict_index_assignment_compiles_cleanly() {
    compiles_cleanly(
        r#"var d = {"x": 1};
           d["x"] = d["x"] + 1;
           print d["x"];"#,
    );
}

// (f) a function attempts `err E` for a kind `E` its signature never
// declares; the compile must fail with a diagnostic naming `E`.
#[test]
fn scenario_f_undeclared_error_kind_is_rejected_with_diagnostic_naming_it() {
    let result = compile(
        r#"fn risky() -> Int throws Oops {
             return err E;
           }"#,
        "golden.lim",
        &CompilerConfig::default(),
    );
    let diagnostics = result.expect_err("undeclared error kind must be rejected");
    assert!(
        diagnostics.iter().any(|d| d.kind == "UndeclaredErrorKind" && d.message.contains("`E`")),
        "expected an UndeclaredErrorKind diagnostic naming `E`, got {diagnostics:?}"
    );
}

// Module resolution (§6): an imported function is visible and callable
// from the importing file once resolved against `module_search_path`.
#[test]
fn import_across_two_files_resolves_and_compiles() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let lib_path = dir.path().join("lib.lim");
    let mut lib_file = std::fs::File::create(&lib_path).expect("create lib.lim");
    write!(lib_file, "fn helper() -> Int {{ return 41; }}").expect("write lib.lim");

    let config = CompilerConfig::default().with_search_path(vec![dir.path().to_path_buf()]);
    let source = r#"import lib show helper;
                     var x = helper() + 1;
                     print x;"#;
    let result = compile(source, "main.lim", &config);
    assert!(result.is_ok(), "expected import to resolve and compile, got {:?}", result.err());
}

// A module that imports itself (directly or transitively) must be
// rejected rather than recursing forever.
#[test]
fn cyclic_import_is_rejected_end_to_end() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let a_path = dir.path().join("a.lim");
    let mut a_file = std::fs::File::create(&a_path).expect("create a.lim");
    write!(a_file, "import a;").expect("write a.lim");

    let config = CompilerConfig::default().with_search_path(vec![dir.path().to_path_buf()]);
    let result = compile("import a;", "main.lim", &config);
    let diagnostics = result.expect_err("cyclic import must be rejected");
    assert!(diagnostics.iter().any(|d| d.kind == "CyclicImport"), "expected a CyclicImport diagnostic, got {diagnostics:?}");
}
