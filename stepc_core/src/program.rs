//! The input program model handed over by the front end.
//!
//! A [`CompilationUnit`] holds type declarations, globals and methods.
//! Each [`Method`] body is a tree of [`Stmt`]s over a closed set of node kinds,
//! and every node carries the [`Span`] it was parsed from.
//!
//! The model is a plain tree: it makes no attempt to be well-typed,
//! as type checking is the front end's business.
//! Shapes the lowering does not expect (e.g. a `choose` nested inside an arithmetic expression)
//! are rejected during lowering with an internal error.
//!
//! ```
//! # use stepc_core::program::*;
//! // x = x + 1;
//! let stmt = Stmt::assign(
//!     Expr::ident("x"),
//!     Expr::binary(BinOp::Add, Expr::ident("x"), Expr::int(1)),
//! );
//! assert!(matches!(stmt.kind, StmtKind::Assign(..)));
//! ```

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Identifiers of variables, types, methods, labels and exceptions.
pub type Ident = String;

/// Integer values.
pub type Integer = i64;

/// Index of a source document in the session's document table.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DocId(pub u16);

/// A source range.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Span {
    pub doc: DocId,
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(doc: DocId, line: u32, col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            doc,
            line,
            col,
            end_line,
            end_col,
        }
    }

    /// A single line span, handy for tests.
    pub fn line(line: u32) -> Self {
        Self::new(DocId(0), line, 1, line, 1)
    }

    /// Nodes synthesized without a source range have line 0.
    pub fn is_unknown(&self) -> bool {
        self.line == 0
    }

    /// The empty range sitting at the end of this one,
    /// i.e., the closing position of a method.
    pub fn closing(&self) -> Self {
        Self::new(self.doc, self.end_line, self.end_col, self.end_line, self.end_col)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A user attribute attached to a statement, e.g. `[Label("idle")]`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: Ident,
    pub args: Vec<String>,
}

impl Attribute {
    pub fn new(name: impl Into<Ident>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// The types of the modeling language.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize)]
pub enum Type {
    /// Boolean type.
    Bool,
    /// Unbounded integer type.
    Int,
    /// A named declared type (enum, range or struct).
    Named(Ident),
    /// Finite sets of values of the given type.
    Set(Box<Type>),
    /// Channels carrying messages of the given type.
    Chan(Box<Type>),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Named(name) => write!(f, "{name}"),
            Type::Set(t) => write!(f, "set<{t}>"),
            Type::Chan(t) => write!(f, "chan<{t}>"),
        }
    }
}

/// Runtime values, which are also the constants of the language.
///
/// Enum values and range values are represented by plain integers.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Val {
    Bool(bool),
    Int(Integer),
    Set(BTreeSet<Val>),
    /// A channel reference, `None` when not (yet) bound to a channel.
    Chan(Option<u32>),
    /// Struct values, fields in declaration order.
    Struct(Vec<(Ident, Val)>),
}

impl From<bool> for Val {
    fn from(value: bool) -> Self {
        Val::Bool(value)
    }
}

impl From<Integer> for Val {
    fn from(value: Integer) -> Self {
        Val::Int(value)
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Bool(b) => write!(f, "{b}"),
            Val::Int(i) => write!(f, "{i}"),
            Val::Set(set) => {
                let items = set.iter().map(Val::to_string).collect::<Vec<_>>();
                write!(f, "{{{}}}", items.join(", "))
            }
            Val::Chan(Some(c)) => write!(f, "chan#{c}"),
            Val::Chan(None) => write!(f, "chan#null"),
            Val::Struct(fields) => {
                let items = fields
                    .iter()
                    .map(|(name, val)| format!("{name}: {val}"))
                    .collect::<Vec<_>>();
                write!(f, "{{ {} }}", items.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// The domain a nondeterministic `choose` picks from.
#[derive(Debug, Clone, PartialEq)]
pub enum ChooseDomain {
    /// `choose(bool)`
    Bool,
    /// `choose(T)` for a named enum or range type.
    Type(Ident),
    /// `choose(s)` for a set-valued expression.
    Set(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(Val),
    Ident(Ident),
    /// Field access `base.field`.
    Field(Box<Expr>, Ident),
    /// Enum literal `Type.Variant`.
    EnumLit(Ident, Ident),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    SetLit(Vec<Expr>),
    /// Set membership `elem in set`.
    In(Box<Expr>, Box<Expr>),
    /// Cardinality of a set.
    Size(Box<Expr>),
    /// Nondeterministic choice, only legal as the whole right-hand side of an assignment.
    Choose(ChooseDomain),
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn int(value: Integer) -> Self {
        Self::new(ExprKind::Const(Val::Int(value)), Span::default())
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ExprKind::Const(Val::Bool(value)), Span::default())
    }

    pub fn ident(name: &str) -> Self {
        Self::new(ExprKind::Ident(name.to_owned()), Span::default())
    }

    pub fn field(base: Expr, field: &str) -> Self {
        Self::new(
            ExprKind::Field(Box::new(base), field.to_owned()),
            Span::default(),
        )
    }

    pub fn enum_lit(ty: &str, variant: &str) -> Self {
        Self::new(
            ExprKind::EnumLit(ty.to_owned(), variant.to_owned()),
            Span::default(),
        )
    }

    pub fn unary(op: UnOp, expr: Expr) -> Self {
        Self::new(ExprKind::Unary(op, Box::new(expr)), Span::default())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(
            ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
            Span::default(),
        )
    }

    pub fn set(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::SetLit(items), Span::default())
    }

    pub fn choose(domain: ChooseDomain) -> Self {
        Self::new(ExprKind::Choose(domain), Span::default())
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// A local variable declaration, possibly with an initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDecl {
    pub name: Ident,
    pub ty: Type,
    pub init: Option<Expr>,
    pub span: Span,
}

impl LocalDecl {
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            init: None,
            span: Span::default(),
        }
    }

    pub fn with_init(mut self, init: Expr) -> Self {
        self.init = Some(init);
        self
    }
}

/// A braced block; declared locals are scoped to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub locals: Vec<LocalDecl>,
    pub stmts: Vec<Stmt>,
}

/// An exception handler of a `try` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    /// The caught exception, [`None`] for the default handler.
    pub exception: Option<Ident>,
    pub body: Stmt,
    pub span: Span,
}

/// A guarded alternative of a `select`.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinPattern {
    /// Enabled when the channel holds a message compatible with the target.
    Receive { chan: Expr, target: Expr },
    /// Enabled when the condition holds.
    Wait(Expr),
    /// Always enabled.
    Timeout,
    /// Always enabled, raises an observable event when selected.
    Event {
        code: Expr,
        value: Expr,
        external: bool,
    },
}

/// A join clause: all patterns must be enabled for the clause to be selectable.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub patterns: Vec<JoinPattern>,
    pub body: Box<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// The select is a valid end state for deadlock analysis.
    pub end: bool,
    pub clauses: Vec<JoinClause>,
}

/// A method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub callee: Ident,
    pub receiver: Option<Expr>,
    pub args: Vec<Expr>,
    /// Places receiving the callee's output parameters.
    pub outputs: Vec<Expr>,
    /// Place receiving the callee's return value.
    pub result: Option<Expr>,
}

impl Call {
    pub fn new(callee: &str, args: Vec<Expr>) -> Self {
        Self {
            callee: callee.to_owned(),
            receiver: None,
            args,
            outputs: Vec::new(),
            result: None,
        }
    }

    pub fn with_result(mut self, result: Expr) -> Self {
        self.result = Some(result);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Block(Block),
    Assign(Expr, Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Foreach {
        var: LocalDecl,
        set: Expr,
        body: Box<Stmt>,
    },
    Try {
        body: Box<Stmt>,
        handlers: Vec<Handler>,
    },
    Raise(Ident),
    Goto(Ident),
    Labeled(Ident, Box<Stmt>),
    Send {
        chan: Expr,
        msg: Expr,
    },
    /// `receive(chan, target)`, shorthand for a single-clause `select`.
    Receive {
        chan: Expr,
        target: Expr,
    },
    Event {
        code: Expr,
        value: Expr,
        external: bool,
    },
    Select(Select),
    Atomic(Box<Stmt>),
    Yield,
    Call(Call),
    AsyncCall(Call),
    Assert {
        cond: Expr,
        message: Option<String>,
    },
    Assume(Expr),
    Accept(Expr),
    Trace {
        format: String,
        args: Vec<Expr>,
    },
    Return(Option<Expr>),
    Skip,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self {
            kind,
            span,
            attributes: Vec::new(),
        }
    }

    fn bare(kind: StmtKind) -> Self {
        Self::new(kind, Span::default())
    }

    pub fn block(locals: Vec<LocalDecl>, stmts: Vec<Stmt>) -> Self {
        Self::bare(StmtKind::Block(Block { locals, stmts }))
    }

    pub fn seq(stmts: Vec<Stmt>) -> Self {
        Self::block(Vec::new(), stmts)
    }

    pub fn assign(lhs: Expr, rhs: Expr) -> Self {
        Self::bare(StmtKind::Assign(lhs, rhs))
    }

    pub fn if_else(cond: Expr, then: Stmt, otherwise: Option<Stmt>) -> Self {
        Self::bare(StmtKind::If {
            cond,
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        })
    }

    pub fn while_loop(cond: Expr, body: Stmt) -> Self {
        Self::bare(StmtKind::While {
            cond,
            body: Box::new(body),
        })
    }

    pub fn foreach(var: LocalDecl, set: Expr, body: Stmt) -> Self {
        Self::bare(StmtKind::Foreach {
            var,
            set,
            body: Box::new(body),
        })
    }

    pub fn try_with(body: Stmt, handlers: Vec<(Option<&str>, Stmt)>) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|(exception, body)| Handler {
                exception: exception.map(str::to_owned),
                body,
                span: Span::default(),
            })
            .collect();
        Self::bare(StmtKind::Try {
            body: Box::new(body),
            handlers,
        })
    }

    pub fn raise(exception: &str) -> Self {
        Self::bare(StmtKind::Raise(exception.to_owned()))
    }

    pub fn goto(label: &str) -> Self {
        Self::bare(StmtKind::Goto(label.to_owned()))
    }

    pub fn labeled(label: &str, stmt: Stmt) -> Self {
        Self::bare(StmtKind::Labeled(label.to_owned(), Box::new(stmt)))
    }

    pub fn send(chan: Expr, msg: Expr) -> Self {
        Self::bare(StmtKind::Send { chan, msg })
    }

    pub fn receive(chan: Expr, target: Expr) -> Self {
        Self::bare(StmtKind::Receive { chan, target })
    }

    pub fn event(code: Expr, value: Expr, external: bool) -> Self {
        Self::bare(StmtKind::Event {
            code,
            value,
            external,
        })
    }

    pub fn select(end: bool, clauses: Vec<(Vec<JoinPattern>, Stmt)>) -> Self {
        let clauses = clauses
            .into_iter()
            .map(|(patterns, body)| JoinClause {
                patterns,
                body: Box::new(body),
                span: Span::default(),
            })
            .collect();
        Self::bare(StmtKind::Select(Select { end, clauses }))
    }

    pub fn atomic(body: Stmt) -> Self {
        Self::bare(StmtKind::Atomic(Box::new(body)))
    }

    pub fn yield_now() -> Self {
        Self::bare(StmtKind::Yield)
    }

    pub fn call(call: Call) -> Self {
        Self::bare(StmtKind::Call(call))
    }

    pub fn async_call(call: Call) -> Self {
        Self::bare(StmtKind::AsyncCall(call))
    }

    pub fn assert(cond: Expr) -> Self {
        Self::bare(StmtKind::Assert {
            cond,
            message: None,
        })
    }

    pub fn assume(cond: Expr) -> Self {
        Self::bare(StmtKind::Assume(cond))
    }

    pub fn accept(cond: Expr) -> Self {
        Self::bare(StmtKind::Accept(cond))
    }

    pub fn trace(format: &str, args: Vec<Expr>) -> Self {
        Self::bare(StmtKind::Trace {
            format: format.to_owned(),
            args,
        })
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Self::bare(StmtKind::Return(value))
    }

    pub fn skip() -> Self {
        Self::bare(StmtKind::Skip)
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }
}

/// A formal parameter (input or output).
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub ty: Type,
    pub span: Span,
}

impl Param {
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            span: Span::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: Ident,
    pub params: Vec<Param>,
    pub outputs: Vec<Param>,
    pub ret: Option<Type>,
    /// Method-level locals, living as long as the call frame.
    pub locals: Vec<LocalDecl>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

impl Method {
    pub fn new(name: &str, body: Vec<Stmt>) -> Self {
        Self {
            name: name.to_owned(),
            params: Vec::new(),
            outputs: Vec::new(),
            ret: None,
            locals: Vec::new(),
            body,
            span: Span::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDeclKind {
    Enum(Vec<Ident>),
    /// Inclusive integer range.
    Range(Integer, Integer),
    Struct(Vec<(Ident, Type)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: Ident,
    pub kind: TypeDeclKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: Ident,
    pub ty: Type,
    /// Initial value, the zero value of the type if [`None`].
    pub init: Option<Val>,
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilationUnit {
    pub name: Ident,
    /// Source file names, indexed by [`DocId`].
    pub documents: Vec<String>,
    pub types: Vec<TypeDecl>,
    pub globals: Vec<Global>,
    pub methods: Vec<Method>,
}

impl CompilationUnit {
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}
