//! The bytecode format: a closed opcode set, relative jump offsets, and a
//! side table of function/class records (§4.4).
//!
//! Grounded on the Julia-style `Instr` enum from the retrieved VM examples
//! (a flat `Vec<Instruction>` addressed by `ip`, each instruction an
//! opcode-plus-operands tuple) generalized to Limit's richer value model
//! and control-flow forms, and on `seqc::codegen`'s "one `FunctionRecord`
//! per declared function, referenced by index" layout for the function
//! side table.

use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnErrorPolicy {
    Stop,
    Continue,
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bool(bool),
    Nil,
}

/// A pattern test for `match` arms. `MatchPattern` bundles the
/// shape-test-and-bind step the spec describes as a single attempt; the
/// VM performs the structural comparison and local-slot binding in one
/// step rather than the compiler unrolling it into dozens of compare/jump
/// primitives per arm.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternTest {
    Wildcard,
    Bind(usize),
    Literal(Constant),
    Range(i64, i64, bool),
    List(Vec<PatternTest>),
    Dict(Vec<(String, PatternTest)>),
    Variant(String, Vec<PatternTest>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpCode {
    LoadConstInt(i64),
    LoadConstFloat(f64),
    LoadConstStr(usize),
    LoadConstBool(bool),
    LoadConstNil,
    LoadLocal(usize),
    StoreLocal(usize),
    LoadGlobal(usize),
    StoreGlobal(usize),
    LoadField(usize),
    StoreField(usize),
    Pop,
    Dup,
    Neg,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    ConcatStr,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// Relative jump: `ip += offset` where `offset = target − (jump_ip + 1)`.
    Jump(isize),
    JumpIfFalse(isize),
    JumpIfTrue(isize),
    /// Pops `arg_count` arguments then the callee. Any index in `omitted`
    /// is a parameter the named-argument reordering pass in the compiler
    /// couldn't supply a value for at the call site (or a trailing
    /// positional argument past what the caller wrote); the VM fills it
    /// from the callee's `param_defaults` instead of the placeholder
    /// pushed for it, or leaves it `Nil` if the parameter has no default.
    Call { arg_count: usize, omitted: Vec<usize> },
    /// Pops `arg_count` arguments then the receiver; dispatches to the
    /// method named by the constant-pool string at `name` on the
    /// receiver's class, looked up at call time (the compiler does not
    /// track concrete class types, only the type checker does, and it has
    /// already run by codegen time). Always positional -- method calls
    /// never go through the named-argument reordering `Call` callees via
    /// a bound identifier get.
    CallMethod { name: usize, arg_count: usize },
    Return,
    ReturnNil,
    CreateList(usize),
    CreateDict(usize),
    CreateRecord(Vec<usize>),
    MakeRange(bool),
    Index,
    SetIndex,
    Print(usize),
    MakeInstance(usize),
    IteratorNew(usize),
    IteratorHasNext(usize),
    IteratorNext(usize),
    IteratorNextKeyValue(usize),
    ClearTemp(usize),
    /// Pops the top of stack; if it is an error value and the current
    /// frame has an active `attempt` handler region, jumps there (as
    /// `TryOrHandle` would) instead of returning. With no active handler
    /// region, returns the error from the enclosing function immediately
    /// (`expr?` propagation). Otherwise leaves the unwrapped success value
    /// on the stack.
    TryUnwrap,
    /// Like `TryUnwrap`, but on error jumps to `handler_offset` instead of
    /// returning, binding the error value to `err_local` first.
    TryOrHandle { err_local: usize, handler_offset: isize },
    /// Registers `handler_offset` (the offset of the first handler's
    /// `TestErrorKind`) as the active try region for the remainder of the
    /// current frame, until the matching `EndTry` runs.
    BeginTry { handler_offset: isize },
    /// Runs when the guarded body completes without error: clears the
    /// active try region and unconditionally jumps `skip_handlers`
    /// forward, past the handler chain.
    EndTry { skip_handlers: isize },
    /// Reached only if control falls through every handler's kind test
    /// without a match; real handler bodies exit via their own `Jump`
    /// past this point, so this is a no-op landing pad.
    EndHandler,
    MatchPattern(PatternTest),
    MakeError { kind: usize, arg_count: usize },
    /// Peeks (does not pop) the error value a `handle` arm is considering;
    /// pushes `true` if its kind matches the constant-pool string at
    /// `kind`, or always `true` when `kind` is the empty-string catch-all.
    TestErrorKind(usize),
    ParallelRun { task_functions: Vec<usize>, cores: Option<usize>, on_error: OnErrorPolicy },
    ConcurrentRun { function: usize },
    Halt,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: OpCode,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct FunctionProto {
    pub name: String,
    pub param_count: usize,
    pub local_count: usize,
    pub temp_count: usize,
    pub code: Vec<Instruction>,
    pub may_fail: bool,
    pub error_kinds: Option<Vec<String>>,
    pub is_generic_error: bool,
    /// One entry per parameter; `Some(code)` for an optional parameter
    /// with a default, executed into the parameter's local slot when the
    /// caller omits the argument.
    pub param_defaults: Vec<Option<Vec<Instruction>>>,
    pub is_method: bool,
}

#[derive(Debug, Clone)]
pub struct ClassProto {
    pub name: String,
    pub field_names: Vec<String>,
    pub methods: Vec<(String, usize)>,
    pub constructor: usize,
}

/// One resolved `import` (§6): the dotted path as written and the file it
/// resolved to on `module_search_path`. The module's own declarations are
/// flattened into this chunk's `functions`/`classes`/`global_names` at the
/// import site rather than kept in a separate per-module table, so this
/// record exists for provenance (`limit bytecode` dumps, diagnostics)
/// rather than as an indirection callers go through at run time.
#[derive(Debug, Clone)]
pub struct ModuleProto {
    pub path: Vec<String>,
    pub source_file: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    pub strings: Vec<Rc<str>>,
}

impl ConstantPool {
    pub fn intern(&mut self, s: &str) -> usize {
        if let Some(i) = self.strings.iter().position(|existing| existing.as_ref() == s) {
            return i;
        }
        self.strings.push(Rc::from(s));
        self.strings.len() - 1
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub functions: Vec<FunctionProto>,
    pub classes: Vec<ClassProto>,
    pub constants: ConstantPool,
    pub global_names: Vec<String>,
    pub modules: Vec<ModuleProto>,
    pub entry: usize,
}
