//! Name resolution: a symbol-table stack mirroring lexical scope (§4.3).
//!
//! Grounded on `seqc::typecheck`'s scope-stack shape (`Vec<HashMap<...>>`,
//! innermost-first lookup) generalized from Seq's single flat word
//! namespace to Limit's nested block/function/class scoping.

use limit_core::types::Type;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub mutable: bool,
}

#[derive(Debug, Default)]
struct Scope {
    symbols: HashMap<String, Symbol>,
}

/// A stack of lexical scopes. The outermost scope (index 0) holds module-
/// level declarations; each block, function body, and `for`/`iter` loop
/// pushes a fresh scope that is popped when the block ends.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        if self.scopes.is_empty() {
            self.scopes.push(Scope::default());
        }
    }

    /// Returns `false` if `name` is already defined in the *current*
    /// (innermost) scope — shadowing an outer scope's binding is allowed,
    /// redeclaring within the same scope is not.
    pub fn define(&mut self, name: &str, ty: Type, mutable: bool) -> bool {
        let scope = self.scopes.last_mut().expect("at least one scope");
        if scope.symbols.contains_key(name) {
            return false;
        }
        scope.symbols.insert(
            name.to_string(),
            Symbol {
                name: name.to_string(),
                ty,
                mutable,
            },
        );
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(sym) = scope.symbols.get(name) {
                return Some(sym);
            }
        }
        None
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Symbols defined directly in the innermost scope, not shadowed outer
    /// ones. Used by import handling to collect a submodule's top-level
    /// declarations for `show`/`hide` filtering.
    pub fn current_scope_symbols(&self) -> Vec<Symbol> {
        self.scopes
            .last()
            .map(|scope| scope.symbols.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_outer() {
        let mut table = SymbolTable::new();
        table.define("x", Type::Int, true);
        table.push_scope();
        table.define("x", Type::Str, true);
        assert_eq!(table.lookup("x").unwrap().ty, Type::Str);
        table.pop_scope();
        assert_eq!(table.lookup("x").unwrap().ty, Type::Int);
    }

    #[test]
    fn redefinition_in_same_scope_is_rejected() {
        let mut table = SymbolTable::new();
        assert!(table.define("x", Type::Int, true));
        assert!(!table.define("x", Type::Str, true));
    }
}
