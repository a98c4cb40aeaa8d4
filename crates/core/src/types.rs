//! The type descriptor lattice (specification §3).
//!
//! Generalizes the teacher's concatenative `Type`/`UnionTypeInfo` pair
//! (`seqc::types::{Type, UnionTypeInfo}`, built for stack effects like
//! `( ..a Int -- ..a Bool )`) to Limit's much richer, infix type system:
//! fixed-width integers, lists/dicts, function types with named/optional
//! parameters, unions, error unions, classes, structural records, refined
//! types, and aliases.
//!
//! A `Type` is an immutable, structurally-hashable descriptor so that two
//! independently-built `Type` values compare equal by shape — this is what
//! lets the type checker memoize `Union`/`ErrorUnion` canonicalization and
//! what lets [`TypeTable`] intern aliases idempotently.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

/// One parameter in a function type: name, declared type, whether it has a
/// default (making it optional in call position), and whether it is
/// syntactically marked optional (`name?: T`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionParam {
    pub name: String,
    pub ty: Type,
    pub has_default: bool,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Vec<FunctionParam>,
    pub return_type: Box<Type>,
    pub may_fail: bool,
    /// Declared error kinds (`throws A, B`), or `None` if the function
    /// cannot fail. Distinct from `is_generic_error` (the bare `throws`
    /// that admits any kind) the same way [`ErrorUnionType`] keeps them
    /// distinct.
    pub error_kinds: Option<Vec<String>>,
    pub is_generic_error: bool,
}

/// An error-union type: a success payload plus a declared, canonical
/// (sorted, deduplicated) set of error-kind names, or the generic `?`
/// error union admitting any kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorUnionType {
    pub success: Box<Type>,
    pub error_kinds: Vec<String>,
    pub is_generic: bool,
}

impl ErrorUnionType {
    pub fn new(success: Type, mut error_kinds: Vec<String>, is_generic: bool) -> Self {
        error_kinds.sort();
        error_kinds.dedup();
        ErrorUnionType {
            success: Box::new(success),
            error_kinds,
            is_generic,
        }
    }

    pub fn admits(&self, kind: &str) -> bool {
        self.is_generic || self.error_kinds.iter().any(|k| k == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldType {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassType {
    pub name: String,
    pub fields: Vec<FieldType>,
    pub methods: Vec<(String, FunctionType)>,
}

impl ClassType {
    pub fn field(&self, name: &str) -> Option<&FieldType> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&FunctionType> {
        self.methods.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructuralType {
    pub fields: Vec<FieldType>,
    /// An open record admits extra fields beyond those listed; a closed
    /// one requires an exact field set for subtyping.
    pub open: bool,
}

impl StructuralType {
    pub fn field(&self, name: &str) -> Option<&FieldType> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A record literal's structural type `{a: Int, b: Str}` is a subtype
    /// of `other` when it covers every field `other` names with a
    /// compatible type (§4.3's structural-record subtyping rule).
    pub fn is_subtype_of(&self, other: &StructuralType) -> bool {
        other.fields.iter().all(|want| {
            self.field(&want.name)
                .is_some_and(|have| have.ty == want.ty)
        })
    }
}

/// `T where predicate` (§9 open question). The predicate is parsed but its
/// runtime enforcement is not part of the type lattice; we keep only a
/// display-friendly source snippet here and let the type checker lower the
/// actual predicate expression into an optional `contract(...)` call, kept
/// at the AST level as the specification instructs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefinedType {
    pub base: Box<Type>,
    pub predicate_source: String,
}

/// A type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    UInt,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    Nil,
    Any,
    List(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    Function(Box<FunctionType>),
    /// Canonical (flattened, deduplicated, sorted-by-Display) set of
    /// alternatives. Always has at least two members; a single-member
    /// union is collapsed to that member by [`Type::union_of`].
    Union(Vec<Type>),
    /// `T?`, sugar for `Union([T, Nil])`. Kept distinct from `Union` so the
    /// type checker and pretty-printer can special-case it, but
    /// [`Type::canonicalize`] always rewrites it to the equivalent `Union`.
    Optional(Box<Type>),
    ErrorUnion(Box<ErrorUnionType>),
    Class(Rc<ClassType>),
    Structural(Box<StructuralType>),
    Refined(Box<RefinedType>),
    Alias(String, Box<Type>),
}

impl Type {
    pub fn optional(inner: Type) -> Type {
        Type::Optional(Box::new(inner))
    }

    pub fn list(elem: Type) -> Type {
        Type::List(Box::new(elem))
    }

    pub fn dict(key: Type, value: Type) -> Type {
        Type::Dict(Box::new(key), Box::new(value))
    }

    pub fn function(params: Vec<FunctionParam>, return_type: Type, may_fail: bool) -> Type {
        Type::Function(Box::new(FunctionType {
            params,
            return_type: Box::new(return_type),
            may_fail,
            error_kinds: None,
            is_generic_error: may_fail,
        }))
    }

    /// Build a canonical union: flattens nested unions, resolves `Nil`
    /// members contributed by `Optional`, deduplicates, and sorts by
    /// `Display` so two independently-constructed unions of the same
    /// alternatives compare equal.
    pub fn union_of(members: impl IntoIterator<Item = Type>) -> Type {
        let mut flat: Vec<Type> = Vec::new();
        for m in members {
            match m.canonicalize() {
                Type::Union(parts) => flat.extend(parts),
                other => flat.push(other),
            }
        }
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut unique = Vec::new();
        for m in flat {
            let key = format!("{m}");
            if seen.insert(key) {
                unique.push(m);
            }
        }
        unique.sort_by_key(|t| format!("{t}"));
        match unique.len() {
            0 => Type::Nil,
            1 => unique.into_iter().next().unwrap(),
            _ => Type::Union(unique),
        }
    }

    /// Idempotent normalization: `Optional` becomes `Union([T, Nil])`,
    /// `Alias` is left in place (alias resolution is a separate,
    /// table-driven step so cycles can be detected), unions are flattened.
    pub fn canonicalize(&self) -> Type {
        match self {
            Type::Optional(inner) => Type::union_of([inner.canonicalize(), Type::Nil]),
            Type::Union(members) => Type::union_of(members.iter().cloned()),
            other => other.clone(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Type::Int
                | Type::UInt
                | Type::I8
                | Type::I16
                | Type::I32
                | Type::I64
                | Type::U8
                | Type::U16
                | Type::U32
                | Type::U64
                | Type::F32
                | Type::F64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// Width-widening result of a binary arithmetic operation: mixed
    /// integer/float promotes to float; otherwise the wider of the two
    /// integer types (§4.3).
    pub fn widen_numeric(&self, other: &Type) -> Option<Type> {
        if !self.is_numeric() || !other.is_numeric() {
            return None;
        }
        if self.is_float() || other.is_float() {
            return Some(if self == &Type::F32 && other == &Type::F32 {
                Type::F32
            } else {
                Type::F64
            });
        }
        Some(if self.int_width() >= other.int_width() {
            self.clone()
        } else {
            other.clone()
        })
    }

    fn int_width(&self) -> u32 {
        match self {
            Type::I8 | Type::U8 => 8,
            Type::I16 | Type::U16 => 16,
            Type::I32 | Type::U32 => 32,
            Type::I64 | Type::U64 | Type::Int | Type::UInt => 64,
            _ => 0,
        }
    }

    /// `T` is implicitly promotable to `T?` and to an error union whose
    /// success type is `T` (§4.3's implicit-promotion rule for return and
    /// argument position).
    pub fn promotes_to(&self, target: &Type) -> bool {
        if self == target {
            return true;
        }
        if let Type::ErrorUnion(target_eu) = target {
            return match self {
                Type::ErrorUnion(self_eu) => {
                    // `Any` as a success type means "this value is an error,
                    // it never carries a success payload" (how `err(...)`
                    // expressions are typed) rather than a literal `Any`
                    // success value, so it's compatible with any target
                    // success type.
                    (self_eu.success == Type::Any
                        || self_eu.success == target_eu.success
                        || self_eu.success.promotes_to(&target_eu.success))
                        && (target_eu.is_generic
                            || self_eu.is_generic
                            || self_eu.error_kinds.iter().all(|k| target_eu.error_kinds.contains(k)))
                }
                _ => self == target_eu.success.as_ref() || self.promotes_to(&target_eu.success),
            };
        }
        match target.canonicalize() {
            Type::Union(members) => members.iter().any(|m| self.promotes_to(m)),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "Int"),
            Type::UInt => write!(f, "UInt"),
            Type::I8 => write!(f, "I8"),
            Type::I16 => write!(f, "I16"),
            Type::I32 => write!(f, "I32"),
            Type::I64 => write!(f, "I64"),
            Type::U8 => write!(f, "U8"),
            Type::U16 => write!(f, "U16"),
            Type::U32 => write!(f, "U32"),
            Type::U64 => write!(f, "U64"),
            Type::F32 => write!(f, "F32"),
            Type::F64 => write!(f, "F64"),
            Type::Bool => write!(f, "Bool"),
            Type::Str => write!(f, "Str"),
            Type::Nil => write!(f, "Nil"),
            Type::Any => write!(f, "Any"),
            Type::List(t) => write!(f, "List<{t}>"),
            Type::Dict(k, v) => write!(f, "Dict<{k}, {v}>"),
            Type::Function(ft) => {
                write!(f, "fn(")?;
                for (i, p) in ft.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", p.name, p.ty)?;
                }
                write!(f, "): {}", ft.return_type)?;
                if ft.may_fail {
                    write!(f, "?")?;
                }
                Ok(())
            }
            Type::Union(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
            Type::Optional(t) => write!(f, "{t}?"),
            Type::ErrorUnion(eu) => {
                write!(f, "{}?", eu.success)?;
                if !eu.is_generic {
                    write!(f, "{}", eu.error_kinds.join(","))?;
                }
                Ok(())
            }
            Type::Class(c) => write!(f, "{}", c.name),
            Type::Structural(s) => {
                write!(f, "{{")?;
                for (i, field) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
            Type::Refined(r) => write!(f, "{} where {}", r.base, r.predicate_source),
            Type::Alias(name, _) => write!(f, "{name}"),
        }
    }
}

/// Interns user type declarations (`type Name = ...`) and resolves aliases
/// idempotently, detecting alias cycles.
#[derive(Debug, Default)]
pub struct TypeTable {
    aliases: std::collections::HashMap<String, Type>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable::default()
    }

    pub fn define_alias(&mut self, name: impl Into<String>, target: Type) {
        self.aliases.insert(name.into(), target);
    }

    /// Resolve `Type::Alias` chains to their final target. Returns `None`
    /// if a cycle is detected (caller reports `UndefinedType`/cycle
    /// diagnostic).
    pub fn resolve(&self, ty: &Type) -> Option<Type> {
        let mut current = ty.clone();
        let mut seen = BTreeSet::new();
        loop {
            match current {
                Type::Alias(name, _) => {
                    if !seen.insert(name.clone()) {
                        return None;
                    }
                    current = self.aliases.get(&name)?.clone();
                }
                other => return Some(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_is_canonical() {
        let a = Type::union_of([Type::Int, Type::Str, Type::Int]);
        let b = Type::union_of([Type::Str, Type::Int]);
        assert_eq!(a, b);
    }

    #[test]
    fn optional_is_sugar_for_union_with_nil() {
        let opt = Type::optional(Type::Int).canonicalize();
        let union = Type::union_of([Type::Int, Type::Nil]);
        assert_eq!(opt, union);
    }

    #[test]
    fn widen_numeric_promotes_mixed_to_float() {
        assert_eq!(Type::Int.widen_numeric(&Type::F64), Some(Type::F64));
        assert_eq!(Type::I8.widen_numeric(&Type::I64), Some(Type::I64));
    }

    #[test]
    fn alias_resolution_is_idempotent() {
        let mut table = TypeTable::new();
        table.define_alias("Meters", Type::F64);
        let alias = Type::Alias("Meters".into(), Box::new(Type::Any));
        assert_eq!(table.resolve(&alias), Some(Type::F64));
        assert_eq!(table.resolve(&table.resolve(&alias).unwrap()), Some(Type::F64));
    }

    #[test]
    fn structural_subtyping_checks_field_coverage() {
        let literal = StructuralType {
            fields: vec![
                FieldType { name: "a".into(), ty: Type::Int },
                FieldType { name: "b".into(), ty: Type::Str },
            ],
            open: false,
        };
        let want = StructuralType {
            fields: vec![FieldType { name: "a".into(), ty: Type::Int }],
            open: true,
        };
        assert!(literal.is_subtype_of(&want));
        let want_missing = StructuralType {
            fields: vec![FieldType { name: "c".into(), ty: Type::Int }],
            open: true,
        };
        assert!(!literal.is_subtype_of(&want_missing));
    }
}
