//! The runtime value model (specification §3).
//!
//! Grounded on `seq-runtime::value`: `ChannelData` is reused verbatim as
//! the shape for `Value::Channel` (an `Rc`-shared sender/receiver pair over
//! May's MPMC channel), and `MapKey` is generalized into [`ValueKey`] for
//! by-value dict-key equality (bool/int-width/string/nil equality, floats
//! excluded from hashing but still comparable by bit pattern per §3's
//! "float bit-identity with NaN != NaN" rule for `GET_INDEX`/`SET_INDEX`).
//!
//! Shared ownership is reference-counted (`Rc`, single-threaded values) or
//! `Arc`/May channel primitives (cross-task handles); cycles through class
//! instances and closures are tolerated, matching §9's design note that an
//! explicit collection pass is unnecessary for a short-lived VM process.

use crate::types::{ClassType, Type};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A handle to a closure: the index of its compiled function record plus
/// the values captured from the defining environment (upvalues). The
/// bytecode range itself lives in the compiler's function table and is
/// looked up by `function_index` at call time, keeping `limit-core` free
/// of any dependency on `limit-compiler`.
#[derive(Debug, Clone)]
pub struct FunctionHandle {
    pub function_index: usize,
    pub name: Rc<str>,
    pub captures: Vec<Value>,
}

impl PartialEq for FunctionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.function_index == other.function_index && self.name == other.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    pub name: Rc<str>,
    pub value: Value,
}

/// A class instance: shared, mutable field slots plus a reference to the
/// class's type descriptor (for method dispatch).
#[derive(Debug, Clone)]
pub struct Instance {
    pub class: Rc<ClassType>,
    pub fields: Vec<FieldSlot>,
}

impl Instance {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| &*f.name == name).map(|f| &f.value)
    }

    pub fn set(&mut self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.fields.iter_mut().find(|f| &*f.name == name) {
            slot.value = value;
            true
        } else {
            false
        }
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.class, &other.class) && self.fields == other.fields
    }
}

/// Internal iteration state, used by `GET_ITERATOR`/`ITERATOR_HAS_NEXT`/
/// `ITERATOR_NEXT` (§4.5). Iterators are fused: calling `next` past
/// exhaustion is a fatal runtime error rather than silently yielding more
/// `None`s, per §4.5's "Iterator protocol".
#[derive(Debug, Clone)]
pub enum IteratorKind {
    List { items: Rc<RefCell<Vec<Value>>>, index: usize },
    DictEntries { entries: Vec<(Value, Value)>, index: usize },
    Range { current: i64, end: i64, step: i64, inclusive: bool },
    Channel(ChannelHandle),
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
    pub start: i64,
    pub end: i64,
    pub step: i64,
    pub inclusive: bool,
}

/// A shared handle to a May MPMC channel, generalized from
/// `seq-runtime::value::ChannelData`. `capacity == 0` is a rendezvous
/// channel (§4.6/GLOSSARY).
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub sender: may::sync::mpmc::Sender<Value>,
    pub receiver: may::sync::mpmc::Receiver<Value>,
    pub capacity: usize,
    pub closed: Rc<RefCell<bool>>,
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.closed, &other.closed)
    }
}

/// A handle to a spawned `task`; joining reads the single result off a
/// rendezvous channel populated exactly once by the task's interpreter
/// instance.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: u64,
    pub result_rx: may::sync::mpmc::Receiver<Result<Value, ErrorValue>>,
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// An error value: kind name (or the generic `?`), message, ordered
/// argument values, and the source location it was raised at (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub kind: String,
    pub message: String,
    pub args: Vec<Value>,
    pub location: crate::source::SourceLocation,
}

impl ErrorValue {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, location: crate::source::SourceLocation) -> Self {
        ErrorValue {
            kind: kind.into(),
            message: message.into(),
            args: Vec::new(),
            location,
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A runtime value (specification §3's value-payload table).
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(Rc<str>),
    Nil,
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<HashMap<ValueKey, (Value, Value)>>>),
    Function(Rc<FunctionHandle>),
    Instance(Rc<RefCell<Instance>>),
    Iterator(Rc<RefCell<IteratorKind>>),
    Range(RangeValue),
    Channel(ChannelHandle),
    Task(Rc<TaskHandle>),
    Error(Rc<ErrorValue>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(entries: Vec<(Value, Value)>) -> Value {
        let mut map = HashMap::new();
        for (k, v) in entries {
            if let Some(key) = ValueKey::from_value(&k) {
                map.insert(key, (k, v));
            }
        }
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn error(e: ErrorValue) -> Value {
        Value::Error(Rc::new(e))
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::UInt(_) => "UInt",
            Value::Float(_) => "Float",
            Value::Bool(_) => "Bool",
            Value::Str(_) => "Str",
            Value::Nil => "Nil",
            Value::List(_) => "List",
            Value::Dict(_) => "Dict",
            Value::Function(_) => "Function",
            Value::Instance(_) => "Instance",
            Value::Iterator(_) => "Iterator",
            Value::Range(_) => "Range",
            Value::Channel(_) => "Channel",
            Value::Task(_) => "Task",
            Value::Error(_) => "Error",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Nil => false,
            _ => true,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Dynamic type of a value, for diagnostics and `match` exhaustiveness
    /// checks performed against runtime-constructed values (e.g. REPL).
    pub fn dynamic_type(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::UInt(_) => Type::UInt,
            Value::Float(_) => Type::F64,
            Value::Bool(_) => Type::Bool,
            Value::Str(_) => Type::Str,
            Value::Nil => Type::Nil,
            Value::List(_) => Type::List(Box::new(Type::Any)),
            Value::Dict(_) => Type::Dict(Box::new(Type::Any), Box::new(Type::Any)),
            Value::Function(_) => Type::Any,
            Value::Instance(inst) => Type::Class(inst.borrow().class.clone()),
            Value::Iterator(_) => Type::Any,
            Value::Range(_) => Type::Any,
            Value::Channel(_) => Type::Any,
            Value::Task(_) => Type::Any,
            Value::Error(_) => Type::Any,
        }
    }
}

/// By-value equality for `==`/`!=` and dict lookups (§3, §4.5): bool,
/// integer equivalence across widths, float bit-identity (`NaN != NaN`,
/// so floats are never usable as dict keys, matching `MapKey`'s exclusion
/// of `Float`), string byte equality, nil equals nil.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                *a >= 0 && *a as u64 == *b
            }
            (Value::UInt(a), Value::UInt(b)) => a == b,
            // Bit-identity, not `==`, so +0.0 and -0.0 compare unequal like
            // every other distinct bit pattern -- except NaN, which IEEE-754
            // says is never equal to anything, including itself, regardless
            // of which bit pattern the NaN payload carries.
            (Value::Float(a), Value::Float(b)) => {
                !a.is_nan() && !b.is_nan() && a.to_bits() == b.to_bits()
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::List(a), Value::List(b)) => *a.borrow() == *b.borrow(),
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Channel(a), Value::Channel(b)) => a == b,
            (Value::Task(a), Value::Task(b)) => a == b,
            (Value::Instance(a), Value::Instance(b)) => *a.borrow() == *b.borrow(),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

/// A hashable subset of [`Value`] for dict keys. Excludes `Float`
/// (NaN-equality makes it unhashable), lists, dicts, functions, instances,
/// and the concurrency handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKey {
    Int(i64),
    UInt(u64),
    Str(Rc<str>),
    Bool(bool),
    Nil,
}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ValueKey::Int(n) => n.hash(state),
            ValueKey::UInt(n) => n.hash(state),
            ValueKey::Str(s) => s.hash(state),
            ValueKey::Bool(b) => b.hash(state),
            ValueKey::Nil => {}
        }
    }
}

impl ValueKey {
    pub fn from_value(value: &Value) -> Option<ValueKey> {
        match value {
            Value::Int(n) => Some(ValueKey::Int(*n)),
            Value::UInt(n) => Some(ValueKey::UInt(*n)),
            Value::Str(s) => Some(ValueKey::Str(s.clone())),
            Value::Bool(b) => Some(ValueKey::Bool(*b)),
            Value::Nil => Some(ValueKey::Nil),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::UInt(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Nil => write!(f, "nil"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (_, (k, v))) in map.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Function(handle) => write!(f, "<fn {}>", handle.name),
            Value::Instance(inst) => write!(f, "<{} instance>", inst.borrow().class.name),
            Value::Iterator(_) => write!(f, "<iterator>"),
            Value::Range(r) => {
                write!(f, "{}..{}{}", r.start, r.end, if r.inclusive { "=" } else { "" })
            }
            Value::Channel(_) => write!(f, "<channel>"),
            Value::Task(t) => write!(f, "<task {}>", t.id),
            Value::Error(e) => write!(f, "<error {}>", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_key_equality_crosses_int_widths() {
        assert_eq!(Value::Int(5), Value::UInt(5));
    }

    #[test]
    fn nan_is_never_equal_to_itself() {
        let nan = Value::Float(f64::NAN);
        assert_ne!(nan, nan.clone());
    }

    #[test]
    fn list_append_then_index() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(4));
            assert_eq!(items.borrow().len(), 4);
            assert_eq!(items.borrow()[3], Value::Int(4));
        } else {
            unreachable!()
        }
    }

    #[test]
    fn dict_lookup_by_string_key() {
        let dict = Value::dict(vec![(Value::str("a"), Value::Int(1))]);
        if let Value::Dict(map) = &dict {
            let key = ValueKey::from_value(&Value::str("a")).unwrap();
            assert_eq!(map.borrow().get(&key).unwrap().1, Value::Int(1));
        } else {
            unreachable!()
        }
    }
}
