//! Abstract syntax tree for Limit (§3).
//!
//! An AST node is always one of the closed variants the specification
//! names: program, expression, statement, declaration, type annotation,
//! pattern. Grounded on `seqc::ast`'s shape (plain `pub struct`/`pub enum`
//! trees, a `SourceLocation` on every node that carries diagnostics), but
//! generalized from Seq's stack-effect declarations to Limit's full
//! infix grammar (classes, match, error unions, concurrency blocks).

use limit_core::source::SourceLocation;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeAnnotation>,
    pub default: Option<Expr>,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeAnnotation>,
    /// `throws E1, E2`; `None` means the function cannot fail, `Some(vec![])`
    /// with `is_generic_error` true means the generic `?` error union.
    pub error_kinds: Option<Vec<String>>,
    pub is_generic_error: bool,
    pub body: Block,
    pub annotations: Vec<String>,
    pub location: SourceLocation,
}

impl FnDecl {
    pub fn may_fail(&self) -> bool {
        self.error_kinds.is_some() || self.is_generic_error
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Option<TypeAnnotation>,
    pub default: Option<Expr>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FnDecl>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDecl {
    pub name: String,
    pub methods: Vec<FnSignature>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnSignature {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeAnnotation>,
    pub error_kinds: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeAliasDecl {
    pub name: String,
    pub target: TypeAnnotation,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDecl {
    pub name: String,
    pub statements: Vec<Stmt>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportStmt {
    pub path: Vec<String>,
    pub alias: Option<String>,
    pub show: Vec<String>,
    pub hide: Vec<String>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: Option<TypeAnnotation>,
    pub value: Expr,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_branch: Block,
    pub else_branch: Option<Box<Stmt>>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Block,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub init: Option<Box<Stmt>>,
    pub condition: Option<Expr>,
    pub step: Option<Box<Stmt>>,
    pub body: Block,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterStmt {
    /// One binding for list/range iteration, two for `iter (k, v in dict)`.
    pub bindings: Vec<String>,
    pub iterable: Expr,
    pub body: Block,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchStmt {
    pub subject: Expr,
    pub arms: Vec<MatchArm>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandleArm {
    pub error_kind: Option<String>,
    pub binding: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptStmt {
    pub body: Block,
    pub handlers: Vec<HandleArm>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnErrorPolicy {
    Stop,
    Continue,
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParallelStmt {
    pub body: Block,
    pub cores: Option<Expr>,
    pub on_error: OnErrorPolicy,
    pub timeout: Option<Expr>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrentStmt {
    pub body: Block,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    VarDecl(VarDecl),
    FnDecl(FnDecl),
    ClassDecl(ClassDecl),
    InterfaceDecl(InterfaceDecl),
    TypeAliasDecl(TypeAliasDecl),
    ModuleDecl(ModuleDecl),
    Import(ImportStmt),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    Iter(IterStmt),
    Match(MatchStmt),
    Return(Option<Expr>, SourceLocation),
    Break(SourceLocation),
    Continue(SourceLocation),
    Attempt(AttemptStmt),
    Parallel(ParallelStmt),
    Concurrent(ConcurrentStmt),
    Task(Expr, SourceLocation),
    Print(Vec<Expr>, SourceLocation),
    /// Parsed but rejected by the type checker with a clear diagnostic
    /// (§9 open question: semantics are reserved, not specified).
    Unsafe(Block),
    Comptime(Block),
    Contract(Expr, SourceLocation),
    Block(Block),
    /// A statement the parser could not make sense of; wraps the
    /// resynchronization span so the rest of the program can still be
    /// type-checked (§4.2 error recovery).
    Error(SourceLocation),
}

impl Stmt {
    pub fn location(&self) -> &SourceLocation {
        match self {
            Stmt::Expr(e) => e.location(),
            Stmt::VarDecl(v) => &v.location,
            Stmt::FnDecl(f) => &f.location,
            Stmt::ClassDecl(c) => &c.location,
            Stmt::InterfaceDecl(i) => &i.location,
            Stmt::TypeAliasDecl(t) => &t.location,
            Stmt::ModuleDecl(m) => &m.location,
            Stmt::Import(i) => &i.location,
            Stmt::If(i) => &i.location,
            Stmt::While(w) => &w.location,
            Stmt::For(f) => &f.location,
            Stmt::Iter(i) => &i.location,
            Stmt::Match(m) => &m.location,
            Stmt::Return(_, loc) => loc,
            Stmt::Break(loc) => loc,
            Stmt::Continue(loc) => loc,
            Stmt::Attempt(a) => &a.location,
            Stmt::Parallel(p) => &p.location,
            Stmt::Concurrent(c) => &c.location,
            Stmt::Task(_, loc) => loc,
            Stmt::Print(_, loc) => loc,
            Stmt::Unsafe(b) => &b.location,
            Stmt::Comptime(b) => &b.location,
            Stmt::Contract(_, loc) => loc,
            Stmt::Block(b) => &b.location,
            Stmt::Error(loc) => loc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Text(String),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLiteral(i64, SourceLocation),
    FloatLiteral(f64, SourceLocation),
    StringLiteral(Vec<StringPart>, SourceLocation),
    BoolLiteral(bool, SourceLocation),
    NilLiteral(SourceLocation),
    Identifier(String, SourceLocation),
    This(SourceLocation),
    ListLiteral(Vec<Expr>, SourceLocation),
    DictLiteral(Vec<(Expr, Expr)>, SourceLocation),
    RecordLiteral(Vec<(String, Expr)>, SourceLocation),
    Unary(UnaryOp, Box<Expr>, SourceLocation),
    Binary(BinaryOp, Box<Expr>, Box<Expr>, SourceLocation),
    Logical(LogicalOp, Box<Expr>, Box<Expr>, SourceLocation),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>, SourceLocation),
    Range(Box<Expr>, Box<Expr>, bool, SourceLocation),
    Assign(Box<Expr>, AssignOp, Box<Expr>, SourceLocation),
    Call(Box<Expr>, Vec<Arg>, SourceLocation),
    Index(Box<Expr>, Box<Expr>, SourceLocation),
    Member(Box<Expr>, String, SourceLocation),
    /// `expr?`
    ErrorPropagate(Box<Expr>, SourceLocation),
    /// `expr ? else { block }`, with an optional named error binding
    /// (defaults to the implicit `err`).
    ElseHandler(Box<Expr>, Option<String>, Block, SourceLocation),
    Ok(Option<Box<Expr>>, SourceLocation),
    Err(Option<String>, Vec<Expr>, SourceLocation),
}

impl Expr {
    pub fn location(&self) -> &SourceLocation {
        match self {
            Expr::IntLiteral(_, l)
            | Expr::FloatLiteral(_, l)
            | Expr::StringLiteral(_, l)
            | Expr::BoolLiteral(_, l)
            | Expr::NilLiteral(l)
            | Expr::Identifier(_, l)
            | Expr::This(l)
            | Expr::ListLiteral(_, l)
            | Expr::DictLiteral(_, l)
            | Expr::RecordLiteral(_, l)
            | Expr::Unary(_, _, l)
            | Expr::Binary(_, _, _, l)
            | Expr::Logical(_, _, _, l)
            | Expr::Ternary(_, _, _, l)
            | Expr::Range(_, _, _, l)
            | Expr::Assign(_, _, _, l)
            | Expr::Call(_, _, l)
            | Expr::Index(_, _, l)
            | Expr::Member(_, _, l)
            | Expr::ErrorPropagate(_, l)
            | Expr::ElseHandler(_, _, _, l)
            | Expr::Ok(_, l)
            | Expr::Err(_, _, l) => l,
        }
    }
}

/// A type annotation as written in source, before lowering to
/// `limit_core::types::Type` by the resolver/type checker.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeAnnotation {
    Named(String),
    List(Box<TypeAnnotation>),
    Dict(Box<TypeAnnotation>, Box<TypeAnnotation>),
    Optional(Box<TypeAnnotation>),
    ErrorUnion(Box<TypeAnnotation>, Vec<String>, bool),
    Union(Vec<TypeAnnotation>),
    Function(Vec<TypeAnnotation>, Box<TypeAnnotation>, bool),
    Structural(Vec<(String, TypeAnnotation)>, bool),
    Refined(Box<TypeAnnotation>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Literal(Expr),
    Identifier(String),
    Wildcard,
    List(Vec<Pattern>),
    Dict(Vec<(String, Pattern)>),
    Variant(String, Vec<Pattern>),
    Range(Expr, Expr, bool),
    Guarded(Box<Pattern>, Expr),
}
