//! Type checker (§4.3): name resolution, type formation, and the bottom-up
//! expression/statement type rules, grounded on `seqc::typecheck`'s
//! two-pass shape (hoist declarations, then walk bodies against a scope
//! stack) generalized from Seq's stack-effect checking to Limit's
//! expression type lattice.

use crate::ast::*;
use crate::config::CompilerConfig;
use crate::resolver::SymbolTable;
use limit_core::diagnostic::{Diagnostic, Phase};
use limit_core::source::SourceLocation;
use limit_core::types::{
    ClassType, ErrorUnionType, FieldType, FunctionParam, FunctionType, StructuralType, Type,
    TypeTable,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

struct FunctionContext {
    return_type: Type,
    error_kinds: Option<Vec<String>>,
    is_generic_error: bool,
    this_type: Option<Type>,
}

pub struct TypeChecker<'a> {
    config: &'a CompilerConfig,
    diagnostics: Vec<Diagnostic>,
    symbols: SymbolTable,
    classes: HashMap<String, Rc<ClassType>>,
    type_table: TypeTable,
    functions: Vec<FunctionContext>,
    loop_depth: u32,
    /// Canonicalized paths of modules currently being loaded, so a module
    /// that (directly or transitively) imports itself is rejected instead
    /// of recursing forever (§6).
    loading: Vec<PathBuf>,
}

/// Runs the full §4.3 pipeline over a parsed program and returns the
/// diagnostics produced. A later compiler pass (the bytecode compiler)
/// re-walks the same AST consulting the declaration tables it needs
/// (function signatures, class layouts) directly, rather than reusing a
/// persisted typed IR — this keeps the checker a pure validation pass,
/// the same separation `seqc` draws between its `typecheck` and `codegen`
/// modules.
pub fn check_program(program: &Program, config: &CompilerConfig) -> Vec<Diagnostic> {
    let mut checker = TypeChecker {
        config,
        diagnostics: Vec::new(),
        symbols: SymbolTable::new(),
        classes: HashMap::new(),
        type_table: TypeTable::default(),
        functions: Vec::new(),
        loop_depth: 0,
        loading: Vec::new(),
    };
    checker.hoist(&program.statements);
    for stmt in &program.statements {
        checker.check_stmt(stmt);
    }
    checker.diagnostics
}

impl<'a> TypeChecker<'a> {
    fn error(&mut self, phase_code: u32, kind: &str, message: impl Into<String>, location: &SourceLocation) -> Type {
        if self.diagnostics.len() < self.config.max_diagnostics {
            self.diagnostics.push(Diagnostic::new(
                Phase::Semantic,
                phase_code,
                kind,
                message,
                location.clone(),
            ));
        }
        // Poisoned: Any matches everything downstream, so one diagnostic
        // per node doesn't cascade into a wall of follow-on errors.
        Type::Any
    }

    fn compatible(&self, a: &Type, b: &Type) -> bool {
        a == &Type::Any || b == &Type::Any || a == b || a.promotes_to(b) || b.promotes_to(a)
    }

    // --- pass 1: hoist top-level declarations ---------------------------

    fn hoist(&mut self, statements: &[Stmt]) {
        for stmt in statements {
            match stmt {
                Stmt::FnDecl(f) => {
                    let ty = self.fn_decl_type(f);
                    self.symbols.define(&f.name, Type::Function(Box::new(ty)), false);
                }
                Stmt::ClassDecl(c) => self.hoist_class(c),
                Stmt::TypeAliasDecl(t) => {
                    let ty = self.lower_type(&t.target);
                    self.type_table.define_alias(&t.name, ty);
                }
                Stmt::ModuleDecl(m) => self.hoist(&m.statements),
                Stmt::Import(import) => self.hoist_import(import),
                _ => {}
            }
        }
    }

    /// Resolves `import a.b.c` against `module_search_path`, rejects
    /// cyclic imports, type-checks the target module in its own scope,
    /// and merges its top-level declarations into the importer's current
    /// scope, filtered by `show`/`hide` (§6).
    ///
    /// Imported classes are still registered process-wide in `self.classes`
    /// (name lookup for types has no notion of scope), so `hide`/`show`
    /// only governs whether an imported class's *value* binding (its
    /// constructor) is visible — its type name is always resolvable.
    fn hoist_import(&mut self, import: &ImportStmt) {
        let Some(path) = self.resolve_module_path(&import.path) else {
            self.error(
                39,
                "ModuleNotFound",
                format!("module `{}` not found on the search path", import.path.join(".")),
                &import.location,
            );
            return;
        };
        if self.loading.contains(&path) {
            self.error(
                40,
                "CyclicImport",
                format!("cyclic import of module `{}`", import.path.join(".")),
                &import.location,
            );
            return;
        }
        let source = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => {
                self.error(
                    39,
                    "ModuleNotFound",
                    format!("could not read module `{}`: {e}", import.path.join(".")),
                    &import.location,
                );
                return;
            }
        };

        let parsed = crate::parser::parse_source(&source, &path.display().to_string());
        for diagnostic in parsed.diagnostics {
            if self.diagnostics.len() < self.config.max_diagnostics {
                self.diagnostics.push(diagnostic);
            }
        }

        self.loading.push(path);
        self.symbols.push_scope();
        self.hoist(&parsed.program.statements);
        for stmt in &parsed.program.statements {
            self.check_stmt(stmt);
        }
        let exported = self.symbols.current_scope_symbols();
        self.symbols.pop_scope();
        self.loading.pop();

        for symbol in exported {
            if import.hide.iter().any(|h| h == &symbol.name) {
                continue;
            }
            if !import.show.is_empty() && !import.show.iter().any(|s| s == &symbol.name) {
                continue;
            }
            if !self.symbols.define(&symbol.name, symbol.ty, symbol.mutable) {
                self.error(
                    3,
                    "DuplicateDefinition",
                    format!("`{}` is already defined in this scope", symbol.name),
                    &import.location,
                );
            }
        }
    }

    fn resolve_module_path(&self, path: &[String]) -> Option<PathBuf> {
        crate::config::resolve_module_path(&self.config.module_search_path, path)
    }

    fn hoist_class(&mut self, class: &ClassDecl) {
        let fields = class
            .fields
            .iter()
            .map(|f| FieldType {
                name: f.name.clone(),
                ty: f.ty.as_ref().map(|t| self.lower_type(t)).unwrap_or(Type::Any),
            })
            .collect();
        let methods = class
            .methods
            .iter()
            .map(|m| (m.name.clone(), self.fn_decl_type(m)))
            .collect();
        let class_type = Rc::new(ClassType {
            name: class.name.clone(),
            fields,
            methods,
        });
        self.classes.insert(class.name.clone(), class_type.clone());
        self.symbols.define(
            &class.name,
            Type::Function(Box::new(FunctionType {
                params: class
                    .fields
                    .iter()
                    .map(|f| FunctionParam {
                        name: f.name.clone(),
                        ty: f.ty.as_ref().map(|t| self.lower_type(t)).unwrap_or(Type::Any),
                        has_default: f.default.is_some(),
                        optional: f.default.is_some(),
                    })
                    .collect(),
                return_type: Box::new(Type::Class(class_type)),
                may_fail: false,
                error_kinds: None,
                is_generic_error: false,
            })),
            false,
        );
    }

    fn fn_decl_type(&mut self, f: &FnDecl) -> FunctionType {
        let params = f
            .params
            .iter()
            .map(|p| FunctionParam {
                name: p.name.clone(),
                ty: p.ty.as_ref().map(|t| self.lower_type(t)).unwrap_or(Type::Any),
                has_default: p.default.is_some(),
                optional: p.optional || p.default.is_some(),
            })
            .collect();
        let return_type = f.return_type.as_ref().map(|t| self.lower_type(t)).unwrap_or(Type::Nil);
        FunctionType {
            params,
            return_type: Box::new(return_type),
            may_fail: f.may_fail(),
            error_kinds: f.error_kinds.clone(),
            is_generic_error: f.is_generic_error,
        }
    }

    // --- type formation ---------------------------------------------------

    fn lower_type(&mut self, ann: &TypeAnnotation) -> Type {
        match ann {
            TypeAnnotation::Named(name) => self.lower_named_type(name),
            TypeAnnotation::List(inner) => Type::list(self.lower_type(inner)),
            TypeAnnotation::Dict(k, v) => Type::dict(self.lower_type(k), self.lower_type(v)),
            TypeAnnotation::Optional(inner) => Type::optional(self.lower_type(inner)),
            TypeAnnotation::ErrorUnion(inner, kinds, is_generic) => {
                let success = self.lower_type(inner);
                Type::ErrorUnion(Box::new(ErrorUnionType::new(success, kinds.clone(), *is_generic)))
            }
            TypeAnnotation::Union(members) => {
                Type::union_of(members.iter().map(|m| self.lower_type(m)).collect::<Vec<_>>())
            }
            TypeAnnotation::Function(params, ret, may_fail) => {
                let params = params
                    .iter()
                    .map(|p| FunctionParam {
                        name: String::new(),
                        ty: self.lower_type(p),
                        has_default: false,
                        optional: false,
                    })
                    .collect();
                Type::function(params, self.lower_type(ret), *may_fail)
            }
            TypeAnnotation::Structural(fields, open) => {
                let fields = fields
                    .iter()
                    .map(|(name, ty)| FieldType {
                        name: name.clone(),
                        ty: self.lower_type(ty),
                    })
                    .collect();
                Type::Structural(Box::new(StructuralType { fields, open: *open }))
            }
            TypeAnnotation::Refined(base, predicate) => {
                let base_ty = self.lower_type(base);
                Type::Refined(Box::new(limit_core::types::RefinedType {
                    base: Box::new(base_ty),
                    predicate_source: format!("{predicate:?}"),
                }))
            }
        }
    }

    fn lower_named_type(&mut self, name: &str) -> Type {
        match name {
            "Int" => Type::Int,
            "UInt" => Type::UInt,
            "I8" => Type::I8,
            "I16" => Type::I16,
            "I32" => Type::I32,
            "I64" => Type::I64,
            "U8" => Type::U8,
            "U16" => Type::U16,
            "U32" => Type::U32,
            "U64" => Type::U64,
            "F32" => Type::F32,
            "F64" => Type::F64,
            "Bool" => Type::Bool,
            "Str" => Type::Str,
            "Nil" => Type::Nil,
            "Any" => Type::Any,
            other => {
                if let Some(class) = self.classes.get(other) {
                    Type::Class(class.clone())
                } else if let Some(resolved) = self.type_table.resolve(&Type::Alias(other.to_string(), Box::new(Type::Any))) {
                    resolved
                } else {
                    let loc = SourceLocation::synthetic();
                    self.error(1, "UndefinedType", format!("undefined type `{other}`"), &loc)
                }
            }
        }
    }

    // --- statements --------------------------------------------------------

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.check_expr(e);
            }
            Stmt::VarDecl(v) => {
                let value_ty = self.check_expr(&v.value);
                let declared = v.ty.as_ref().map(|t| self.lower_type(t));
                let final_ty = if let Some(declared) = declared {
                    if !self.compatible(&value_ty, &declared) {
                        self.error(
                            2,
                            "TypeMismatch",
                            format!("expected `{declared}`, found `{value_ty}`"),
                            &v.location,
                        );
                    }
                    declared
                } else {
                    value_ty
                };
                if !self.symbols.define(&v.name, final_ty, true) {
                    self.error(3, "DuplicateDefinition", format!("`{}` is already defined in this scope", v.name), &v.location);
                }
            }
            Stmt::FnDecl(f) => self.check_fn_body(f, None),
            Stmt::ClassDecl(c) => self.check_class_body(c),
            Stmt::InterfaceDecl(_) => {}
            Stmt::TypeAliasDecl(_) => {}
            Stmt::ModuleDecl(m) => {
                self.symbols.push_scope();
                for stmt in &m.statements {
                    self.check_stmt(stmt);
                }
                self.symbols.pop_scope();
            }
            // Resolved and merged into scope during `hoist`, the same
            // pass-1 treatment `TypeAliasDecl` gets.
            Stmt::Import(_) => {}
            Stmt::If(i) => {
                let cond_ty = self.check_expr(&i.condition);
                if !self.compatible(&cond_ty, &Type::Bool) {
                    self.error(4, "TypeMismatch", format!("`if` condition must be Bool, found `{cond_ty}`"), &i.location);
                }
                self.check_block(&i.then_branch);
                if let Some(else_branch) = &i.else_branch {
                    self.check_stmt(else_branch);
                }
            }
            Stmt::While(w) => {
                let cond_ty = self.check_expr(&w.condition);
                if !self.compatible(&cond_ty, &Type::Bool) {
                    self.error(4, "TypeMismatch", format!("`while` condition must be Bool, found `{cond_ty}`"), &w.location);
                }
                self.loop_depth += 1;
                self.check_block(&w.body);
                self.loop_depth -= 1;
            }
            Stmt::For(f) => {
                self.symbols.push_scope();
                if let Some(init) = &f.init {
                    self.check_stmt(init);
                }
                if let Some(cond) = &f.condition {
                    let cond_ty = self.check_expr(cond);
                    if !self.compatible(&cond_ty, &Type::Bool) {
                        self.error(4, "TypeMismatch", format!("`for` condition must be Bool, found `{cond_ty}`"), &f.location);
                    }
                }
                if let Some(step) = &f.step {
                    self.check_stmt(step);
                }
                self.loop_depth += 1;
                self.check_block(&f.body);
                self.loop_depth -= 1;
                self.symbols.pop_scope();
            }
            Stmt::Iter(it) => {
                let iterable_ty = self.check_expr(&it.iterable);
                self.symbols.push_scope();
                match (&iterable_ty, it.bindings.as_slice()) {
                    (Type::List(elem), [name]) => {
                        self.symbols.define(name, (**elem).clone(), true);
                    }
                    (Type::Dict(k, v), [kn, vn]) => {
                        self.symbols.define(kn, (**k).clone(), true);
                        self.symbols.define(vn, (**v).clone(), true);
                    }
                    (Type::Any, bindings) => {
                        for b in bindings {
                            self.symbols.define(b, Type::Any, true);
                        }
                    }
                    _ => {
                        for b in &it.bindings {
                            self.symbols.define(b, Type::Any, true);
                        }
                        self.error(5, "NotIterable", format!("`{iterable_ty}` is not iterable with {} binding(s)", it.bindings.len()), &it.location);
                    }
                }
                self.loop_depth += 1;
                self.check_block(&it.body);
                self.loop_depth -= 1;
                self.symbols.pop_scope();
            }
            Stmt::Match(m) => self.check_match(m),
            Stmt::Return(value, location) => {
                let value_ty = value.as_ref().map(|v| self.check_expr(v)).unwrap_or(Type::Nil);
                if let Some(ctx) = self.functions.last() {
                    let expected = if ctx.error_kinds.is_some() || ctx.is_generic_error {
                        Type::ErrorUnion(Box::new(ErrorUnionType::new(
                            ctx.return_type.clone(),
                            ctx.error_kinds.clone().unwrap_or_default(),
                            ctx.is_generic_error,
                        )))
                    } else {
                        ctx.return_type.clone()
                    };
                    if !self.compatible(&value_ty, &expected) {
                        self.error(6, "TypeMismatch", format!("expected return type `{expected}`, found `{value_ty}`"), location);
                    }
                } else {
                    self.error(7, "ReturnOutsideFunction", "`return` used outside a function", location);
                }
            }
            Stmt::Break(location) => {
                if self.loop_depth == 0 {
                    self.error(8, "BreakOutsideLoop", "`break` used outside a loop", location);
                }
            }
            Stmt::Continue(location) => {
                if self.loop_depth == 0 {
                    self.error(9, "ContinueOutsideLoop", "`continue` used outside a loop", location);
                }
            }
            Stmt::Attempt(a) => {
                self.check_block(&a.body);
                for handler in &a.handlers {
                    self.symbols.push_scope();
                    if let Some(binding) = &handler.binding {
                        self.symbols.define(binding, Type::Any, false);
                    }
                    self.check_block(&handler.body);
                    self.symbols.pop_scope();
                }
            }
            Stmt::Parallel(p) => {
                if let Some(cores) = &p.cores {
                    let ty = self.check_expr(cores);
                    if !self.compatible(&ty, &Type::Int) {
                        self.error(10, "TypeMismatch", format!("`cores:` must be Int, found `{ty}`"), &p.location);
                    }
                }
                if let Some(timeout) = &p.timeout {
                    let ty = self.check_expr(timeout);
                    if !self.compatible(&ty, &Type::Int) {
                        self.error(10, "TypeMismatch", format!("`timeout:` must be Int, found `{ty}`"), &p.location);
                    }
                }
                self.check_block(&p.body);
            }
            Stmt::Concurrent(c) => self.check_block(&c.body),
            Stmt::Task(e, _) => {
                self.check_expr(e);
            }
            Stmt::Print(args, _) => {
                for arg in args {
                    self.check_expr(arg);
                }
            }
            Stmt::Unsafe(_) => {
                self.error(11, "UnsafeNotSupported", "`unsafe` blocks are reserved and not yet implemented", stmt.location());
            }
            Stmt::Comptime(_) => {
                self.error(12, "ComptimeNotSupported", "`comptime` blocks are reserved and not yet implemented", stmt.location());
            }
            Stmt::Contract(e, _) => {
                let ty = self.check_expr(e);
                if !self.compatible(&ty, &Type::Bool) {
                    self.error(13, "TypeMismatch", format!("`contract` predicate must be Bool, found `{ty}`"), stmt.location());
                }
            }
            Stmt::Block(b) => self.check_block(b),
            Stmt::Error(_) => {}
        }
    }

    fn check_block(&mut self, block: &Block) {
        self.symbols.push_scope();
        for stmt in &block.statements {
            self.check_stmt(stmt);
        }
        self.symbols.pop_scope();
    }

    fn check_fn_body(&mut self, f: &FnDecl, this_type: Option<Type>) {
        let return_type = f.return_type.as_ref().map(|t| self.lower_type(t)).unwrap_or(Type::Nil);
        self.functions.push(FunctionContext {
            return_type,
            error_kinds: f.error_kinds.clone(),
            is_generic_error: f.is_generic_error,
            this_type,
        });
        self.symbols.push_scope();
        for param in &f.params {
            let ty = param.ty.as_ref().map(|t| self.lower_type(t)).unwrap_or(Type::Any);
            self.symbols.define(&param.name, ty, true);
        }
        for stmt in &f.body.statements {
            self.check_stmt(stmt);
        }
        self.symbols.pop_scope();
        self.functions.pop();
    }

    fn check_class_body(&mut self, class: &ClassDecl) {
        let class_type = self.classes.get(&class.name).cloned();
        let this_type = class_type.map(Type::Class);
        for field in &class.fields {
            if let Some(default) = &field.default {
                let default_ty = self.check_expr(default);
                if let Some(ty) = &field.ty {
                    let declared = self.lower_type(ty);
                    if !self.compatible(&default_ty, &declared) {
                        self.error(14, "TypeMismatch", format!("field `{}` expected `{declared}`, found `{default_ty}`", field.name), &field.location);
                    }
                }
            }
        }
        for method in &class.methods {
            self.check_fn_body(method, this_type.clone());
        }
    }

    fn check_match(&mut self, m: &MatchStmt) {
        let subject_ty = self.check_expr(&m.subject);
        let mut has_catch_all = false;
        for arm in &m.arms {
            self.symbols.push_scope();
            self.bind_pattern(&arm.pattern, &subject_ty);
            if matches!(arm.pattern, Pattern::Wildcard | Pattern::Identifier(_)) {
                has_catch_all = true;
            }
            if let Pattern::Guarded(inner, guard) = &arm.pattern {
                let _ = inner;
                let guard_ty = self.check_expr(guard);
                if !self.compatible(&guard_ty, &Type::Bool) {
                    self.error(15, "TypeMismatch", format!("match guard must be Bool, found `{guard_ty}`"), &m.location);
                }
            }
            self.check_block(&arm.body);
            self.symbols.pop_scope();
        }
        if !has_catch_all && !matches!(subject_ty, Type::Union(_) | Type::Optional(_)) {
            self.error(
                16,
                "NonExhaustiveMatch",
                "match is not exhaustive; add a wildcard `_` arm",
                &m.location,
            );
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, subject_ty: &Type) {
        match pattern {
            Pattern::Identifier(name) => {
                self.symbols.define(name, subject_ty.clone(), false);
            }
            Pattern::Guarded(inner, _) => self.bind_pattern(inner, subject_ty),
            Pattern::List(items) => {
                let elem = match subject_ty {
                    Type::List(elem) => (**elem).clone(),
                    _ => Type::Any,
                };
                for item in items {
                    self.bind_pattern(item, &elem);
                }
            }
            Pattern::Dict(fields) => {
                for (_, pattern) in fields {
                    self.bind_pattern(pattern, &Type::Any);
                }
            }
            Pattern::Variant(_, args) => {
                for arg in args {
                    self.bind_pattern(arg, &Type::Any);
                }
            }
            Pattern::Wildcard | Pattern::Literal(_) | Pattern::Range(..) => {}
        }
    }

    // --- expressions -------------------------------------------------------

    fn check_expr(&mut self, expr: &Expr) -> Type {
        match expr {
            Expr::IntLiteral(..) => Type::Int,
            Expr::FloatLiteral(..) => Type::F64,
            Expr::BoolLiteral(..) => Type::Bool,
            Expr::NilLiteral(..) => Type::Nil,
            Expr::StringLiteral(parts, _) => {
                for part in parts {
                    if let StringPart::Expr(e) = part {
                        self.check_expr(e);
                    }
                }
                Type::Str
            }
            Expr::This(location) => self
                .functions
                .last()
                .and_then(|ctx| ctx.this_type.clone())
                .unwrap_or_else(|| self.error(17, "ThisOutsideMethod", "`this` used outside a method", location)),
            Expr::Identifier(name, location) => match self.symbols.lookup(name) {
                Some(sym) => sym.ty.clone(),
                None => self.error(18, "UndefinedName", format!("undefined name `{name}`"), location),
            },
            Expr::ListLiteral(items, _) => {
                let mut elem_ty = None;
                for item in items {
                    let ty = self.check_expr(item);
                    elem_ty = Some(match elem_ty {
                        None => ty,
                        Some(prev) => {
                            if self.compatible(&prev, &ty) {
                                if prev == Type::Any {
                                    ty
                                } else {
                                    prev
                                }
                            } else {
                                Type::union_of(vec![prev, ty])
                            }
                        }
                    });
                }
                Type::list(elem_ty.unwrap_or(Type::Any))
            }
            Expr::DictLiteral(entries, _) => {
                let mut key_ty = None;
                let mut val_ty = None;
                for (k, v) in entries {
                    let kt = self.check_expr(k);
                    let vt = self.check_expr(v);
                    key_ty = Some(key_ty.unwrap_or(kt));
                    val_ty = Some(val_ty.unwrap_or(vt));
                }
                Type::dict(key_ty.unwrap_or(Type::Any), val_ty.unwrap_or(Type::Any))
            }
            Expr::RecordLiteral(fields, _) => {
                let fields = fields
                    .iter()
                    .map(|(name, value)| FieldType {
                        name: name.clone(),
                        ty: self.check_expr(value),
                    })
                    .collect();
                Type::Structural(Box::new(StructuralType { fields, open: false }))
            }
            Expr::Unary(op, operand, location) => {
                let ty = self.check_expr(operand);
                match op {
                    UnaryOp::Neg => {
                        if ty.is_numeric() || ty == Type::Any {
                            ty
                        } else {
                            self.error(19, "TypeMismatch", format!("unary `-` requires a numeric operand, found `{ty}`"), location)
                        }
                    }
                    UnaryOp::Not => {
                        if self.compatible(&ty, &Type::Bool) {
                            Type::Bool
                        } else {
                            self.error(19, "TypeMismatch", format!("unary `!` requires a Bool operand, found `{ty}`"), location)
                        }
                    }
                }
            }
            Expr::Binary(op, lhs, rhs, location) => self.check_binary(*op, lhs, rhs, location),
            Expr::Logical(_, lhs, rhs, location) => {
                let lt = self.check_expr(lhs);
                let rt = self.check_expr(rhs);
                if !self.compatible(&lt, &Type::Bool) || !self.compatible(&rt, &Type::Bool) {
                    self.error(20, "TypeMismatch", "logical operators require Bool operands", location);
                }
                Type::Bool
            }
            Expr::Ternary(cond, then_branch, else_branch, location) => {
                let cond_ty = self.check_expr(cond);
                if !self.compatible(&cond_ty, &Type::Bool) {
                    self.error(21, "TypeMismatch", format!("ternary condition must be Bool, found `{cond_ty}`"), location);
                }
                let then_ty = self.check_expr(then_branch);
                let else_ty = self.check_expr(else_branch);
                if then_ty == else_ty {
                    then_ty
                } else {
                    Type::union_of(vec![then_ty, else_ty])
                }
            }
            Expr::Range(start, end, _, location) => {
                let st = self.check_expr(start);
                let et = self.check_expr(end);
                if !st.is_numeric() || !et.is_numeric() {
                    self.error(22, "TypeMismatch", "range bounds must be numeric", location);
                }
                Type::list(Type::Int)
            }
            Expr::Assign(target, _, value, location) => self.check_assign(target, value, location),
            Expr::Call(callee, args, location) => self.check_call(callee, args, location),
            Expr::Index(target, index, location) => self.check_index(target, index, location),
            Expr::Member(target, name, location) => self.check_member(target, name, location),
            Expr::ErrorPropagate(inner, location) => self.check_error_propagate(inner, location),
            Expr::ElseHandler(inner, binding, block, location) => {
                self.check_error_propagate_inner(inner, location);
                self.symbols.push_scope();
                self.symbols.define(binding.as_deref().unwrap_or("err"), Type::Any, false);
                for stmt in &block.statements {
                    self.check_stmt(stmt);
                }
                self.symbols.pop_scope();
                Type::Any
            }
            Expr::Ok(value, _) => {
                let success = value.as_ref().map(|v| self.check_expr(v)).unwrap_or(Type::Nil);
                Type::ErrorUnion(Box::new(ErrorUnionType::new(success, vec![], true)))
            }
            Expr::Err(kind, args, location) => {
                for arg in args {
                    self.check_expr(arg);
                }
                if let Some(kind) = kind {
                    let declared = self.functions.last().and_then(|ctx| ctx.error_kinds.as_ref());
                    let admitted = self
                        .functions
                        .last()
                        .map(|ctx| ctx.is_generic_error || declared.is_some_and(|ks| ks.contains(kind)))
                        .unwrap_or(false);
                    if !admitted {
                        // Poisoned to a generic error union: the kind is
                        // already wrong, no need to also flag the resulting
                        // value as a return-type mismatch.
                        self.error(
                            37,
                            "UndeclaredErrorKind",
                            format!("error kind `{kind}` is not declared by the enclosing function"),
                            location,
                        );
                        return Type::ErrorUnion(Box::new(ErrorUnionType::new(Type::Any, vec![], true)));
                    }
                    Type::ErrorUnion(Box::new(ErrorUnionType::new(Type::Any, vec![kind.clone()], false)))
                } else {
                    Type::ErrorUnion(Box::new(ErrorUnionType::new(Type::Any, vec![], true)))
                }
            }
        }
    }

    fn check_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, location: &SourceLocation) -> Type {
        let lt = self.check_expr(lhs);
        let rt = self.check_expr(rhs);
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
                if let Some(widened) = lt.widen_numeric(&rt) {
                    widened
                } else if op == BinaryOp::Add && lt == Type::Str && rt == Type::Str {
                    Type::Str
                } else if lt == Type::Any || rt == Type::Any {
                    Type::Any
                } else {
                    self.error(23, "TypeMismatch", format!("operator requires numeric operands, found `{lt}` and `{rt}`"), location)
                }
            }
            BinaryOp::Eq | BinaryOp::NotEq => {
                if self.compatible(&lt, &rt) || lt == Type::Nil || rt == Type::Nil {
                    Type::Bool
                } else {
                    self.error(24, "TypeMismatch", format!("cannot compare `{lt}` with `{rt}`"), location);
                    Type::Bool
                }
            }
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                let ok = (lt.is_numeric() && rt.is_numeric()) || (lt == Type::Str && rt == Type::Str) || lt == Type::Any || rt == Type::Any;
                if !ok {
                    self.error(25, "TypeMismatch", format!("cannot order `{lt}` and `{rt}`"), location);
                }
                Type::Bool
            }
        }
    }

    fn check_assign(&mut self, target: &Expr, value: &Expr, location: &SourceLocation) -> Type {
        if !matches!(target, Expr::Identifier(..) | Expr::Index(..) | Expr::Member(..)) {
            self.error(26, "NotAssignable", "assignment target must be a variable, index, or member expression", location);
        }
        let target_ty = self.check_expr(target);
        let value_ty = self.check_expr(value);
        if !self.compatible(&value_ty, &target_ty) {
            self.error(27, "TypeMismatch", format!("cannot assign `{value_ty}` to `{target_ty}`"), location);
        }
        target_ty
    }

    fn check_call(&mut self, callee: &Expr, args: &[Arg], location: &SourceLocation) -> Type {
        let callee_ty = self.check_expr(callee);
        let ft = match &callee_ty {
            Type::Function(ft) => (**ft).clone(),
            Type::Any => {
                for arg in args {
                    self.check_expr(&arg.value);
                }
                return Type::Any;
            }
            other => {
                return self.error(28, "NotCallable", format!("`{other}` is not callable"), location);
            }
        };

        let mut positional_used = 0;
        let mut named: HashMap<&str, &Arg> = HashMap::new();
        for arg in args {
            if let Some(name) = &arg.name {
                named.insert(name.as_str(), arg);
            }
        }
        for (i, param) in ft.params.iter().enumerate() {
            if let Some(arg) = named.get(param.name.as_str()) {
                let arg_ty = self.check_expr(&arg.value);
                if !self.compatible(&arg_ty, &param.ty) {
                    self.error(29, "TypeMismatch", format!("argument `{}` expected `{}`, found `{arg_ty}`", param.name, param.ty), location);
                }
            } else if positional_used < args.len() && args[positional_used].name.is_none() {
                let arg_ty = self.check_expr(&args[positional_used].value);
                if !self.compatible(&arg_ty, &param.ty) {
                    self.error(29, "TypeMismatch", format!("argument {i} expected `{}`, found `{arg_ty}`", param.ty), location);
                }
                positional_used += 1;
            } else if !param.optional {
                self.error(30, "MissingArgument", format!("missing required argument `{}`", param.name), location);
            }
        }
        if positional_used < args.iter().filter(|a| a.name.is_none()).count() {
            self.error(31, "TooManyArguments", "too many positional arguments", location);
        }

        if ft.may_fail {
            Type::ErrorUnion(Box::new(ErrorUnionType::new(
                (*ft.return_type).clone(),
                ft.error_kinds.clone().unwrap_or_default(),
                ft.is_generic_error,
            )))
        } else {
            (*ft.return_type).clone()
        }
    }

    fn check_index(&mut self, target: &Expr, index: &Expr, location: &SourceLocation) -> Type {
        let target_ty = self.check_expr(target);
        let index_ty = self.check_expr(index);
        match &target_ty {
            Type::List(elem) => {
                if !self.compatible(&index_ty, &Type::Int) {
                    self.error(32, "TypeMismatch", format!("list index must be Int, found `{index_ty}`"), location);
                }
                (**elem).clone()
            }
            Type::Dict(key, value) => {
                if !self.compatible(&index_ty, key) {
                    self.error(32, "TypeMismatch", format!("dict key expected `{key}`, found `{index_ty}`"), location);
                }
                (**value).clone()
            }
            Type::Any => Type::Any,
            other => self.error(33, "NotIndexable", format!("`{other}` cannot be indexed"), location),
        }
    }

    fn check_member(&mut self, target: &Expr, name: &str, location: &SourceLocation) -> Type {
        let target_ty = self.check_expr(target);
        match &target_ty {
            Type::Class(class) => {
                if let Some(field) = class.field(name) {
                    field.ty.clone()
                } else if let Some(method) = class.method(name) {
                    Type::Function(Box::new(method.clone()))
                } else {
                    self.error(34, "UndefinedMember", format!("`{}` has no member `{name}`", class.name), location)
                }
            }
            Type::Structural(st) => st
                .field(name)
                .map(|f| f.ty.clone())
                .unwrap_or_else(|| self.error(34, "UndefinedMember", format!("structural type has no field `{name}`"), location)),
            Type::Any => Type::Any,
            other => self.error(35, "UndefinedMember", format!("`{other}` has no member `{name}`"), location),
        }
    }

    fn check_error_propagate(&mut self, inner: &Expr, location: &SourceLocation) -> Type {
        self.check_error_propagate_inner(inner, location)
    }

    fn check_error_propagate_inner(&mut self, inner: &Expr, location: &SourceLocation) -> Type {
        let inner_ty = self.check_expr(inner);
        let enclosing_may_fail = self
            .functions
            .last()
            .map(|ctx| ctx.error_kinds.is_some() || ctx.is_generic_error)
            .unwrap_or(false);
        if !enclosing_may_fail {
            self.error(36, "ErrorPropagateOutsideFailableFn", "`?` used inside a function that cannot fail", location);
        }
        match inner_ty {
            Type::ErrorUnion(eu) => {
                if !eu.is_generic {
                    if let Some(ctx) = self.functions.last() {
                        if let Some(declared) = &ctx.error_kinds {
                            for kind in &eu.error_kinds {
                                if !declared.is_empty() && !declared.contains(kind) && !ctx.is_generic_error {
                                    self.error(37, "UndeclaredErrorKind", format!("error kind `{kind}` is not declared by the enclosing function"), location);
                                }
                            }
                        }
                    }
                }
                eu.success.as_ref().clone()
            }
            Type::Any => Type::Any,
            other => self.error(38, "TypeMismatch", format!("`?` requires an error-union operand, found `{other}`"), location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn check(src: &str) -> Vec<Diagnostic> {
        let result = parse_source(src, "test.lim");
        assert!(result.diagnostics.is_empty(), "parse errors: {:?}", result.diagnostics);
        check_program(&result.program, &CompilerConfig::default())
    }

    #[test]
    fn arithmetic_widens_mixed_int_float() {
        let diags = check("var x: F64 = 1 + 2.0;");
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn mismatched_var_type_is_reported() {
        let diags = check("var x: Str = 1;");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, "TypeMismatch");
    }

    #[test]
    fn undefined_name_is_reported() {
        let diags = check("var x = y;");
        assert_eq!(diags[0].kind, "UndefinedName");
    }

    #[test]
    fn logical_operators_require_bool() {
        let diags = check("var x = 1 and 2;");
        assert!(diags.iter().any(|d| d.kind == "TypeMismatch"));
    }

    #[test]
    fn function_call_arity_is_checked() {
        let diags = check(
            r#"fn add(a: Int, b: Int) -> Int { return a + b; }
               var x = add(1);"#,
        );
        assert!(diags.iter().any(|d| d.kind == "MissingArgument"));
    }

    #[test]
    fn error_propagate_requires_failable_function() {
        let diags = check(
            r#"fn risky() -> Int throws Oops { return ok(1); }
               fn main() -> Int { return risky()?; }"#,
        );
        assert!(diags.iter().any(|d| d.kind == "ErrorPropagateOutsideFailableFn"));
    }

    #[test]
    fn error_propagate_inside_failable_function_is_accepted() {
        let diags = check(
            r#"fn risky() -> Int throws Oops { return ok(1); }
               fn main() -> Int throws Oops { return risky()?; }"#,
        );
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn match_without_wildcard_on_open_type_is_non_exhaustive() {
        let diags = check(
            r#"var x = 5;
               match (x) {
                 1 => print "one";,
                 2 => print "two";,
               }"#,
        );
        assert!(diags.iter().any(|d| d.kind == "NonExhaustiveMatch"));
    }

    #[test]
    fn class_fields_and_methods_resolve() {
        let diags = check(
            r#"class Point {
                 x: Int = 0;
                 y: Int = 0;
                 fn sum() -> Int { return this.x + this.y; }
               }
               var p = Point(x: 1, y: 2);
               var s = p.sum();"#,
        );
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn bare_return_value_is_accepted_inside_failable_function() {
        let diags = check(r#"fn risky() -> Int throws Oops { return 1; }"#);
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn undeclared_err_kind_is_rejected() {
        let diags = check(r#"fn risky() -> Int throws Oops { return err Other; }"#);
        assert!(diags.iter().any(|d| d.kind == "UndeclaredErrorKind"), "{diags:?}");
    }

    #[test]
    fn declared_err_kind_is_accepted() {
        let diags = check(r#"fn risky() -> Int throws Oops { return err Oops; }"#);
        assert!(diags.is_empty(), "{diags:?}");
    }

    fn check_with_config(src: &str, config: &CompilerConfig) -> Vec<Diagnostic> {
        let result = parse_source(src, "test.lim");
        assert!(result.diagnostics.is_empty(), "parse errors: {:?}", result.diagnostics);
        check_program(&result.program, config)
    }

    #[test]
    fn import_merges_shown_symbol_into_scope() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mathx.lim"), "fn square(n: Int) -> Int { return n * n; }").unwrap();
        let config = CompilerConfig::default().with_search_path(vec![dir.path().to_path_buf()]);
        let diags = check_with_config(
            r#"import mathx show square;
               var x = square(3);"#,
            &config,
        );
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn import_hide_blocks_the_hidden_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mathx.lim"),
            "fn square(n: Int) -> Int { return n * n; }\nfn cube(n: Int) -> Int { return n * n * n; }",
        )
        .unwrap();
        let config = CompilerConfig::default().with_search_path(vec![dir.path().to_path_buf()]);
        let diags = check_with_config(
            r#"import mathx hide cube;
               var x = cube(3);"#,
            &config,
        );
        assert!(diags.iter().any(|d| d.kind == "UndefinedName"), "{diags:?}");
    }

    #[test]
    fn import_of_missing_module_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompilerConfig::default().with_search_path(vec![dir.path().to_path_buf()]);
        let diags = check_with_config("import does.not.exist;", &config);
        assert!(diags.iter().any(|d| d.kind == "ModuleNotFound"), "{diags:?}");
    }

    #[test]
    fn cyclic_import_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.lim"), "import b;").unwrap();
        std::fs::write(dir.path().join("b.lim"), "import a;").unwrap();
        let config = CompilerConfig::default().with_search_path(vec![dir.path().to_path_buf()]);
        let diags = check_with_config("import a;", &config);
        assert!(diags.iter().any(|d| d.kind == "CyclicImport"), "{diags:?}");
    }
}
