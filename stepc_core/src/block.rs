//! Basic blocks, the unit of scheduling.

use crate::program::{Attribute, Call, ChooseDomain, Expr, Ident, JoinPattern, Span};
use crate::scope::{LocalId, ScopeId};
use std::fmt;

/// An indexing object for the blocks of a method.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "Enter")
        } else {
            write!(f, "B{}", self.0)
        }
    }
}

/// The single statement executed by a block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStmt {
    Assign(Expr, Expr),
    Send { chan: Expr, msg: Expr },
    Event { code: Expr, value: Expr, external: bool },
    Assert { cond: Expr, message: Option<String> },
    Assume(Expr),
    Accept(Expr),
    Trace { format: String, args: Vec<Expr> },
    /// Stores the exception as pending.
    Raise(Ident),
    /// Clears the pending exception on entering a handler.
    Catch,
    /// Publishes the domain of a choice and requests a pick.
    ChooseStart(ChooseDomain),
    /// Binds the picked value.
    ChooseFinish(Expr),
    /// Builds the callee frame and invokes it.
    CallStart(Call),
    /// Rethrows the callee exception, or copies back outputs and return value.
    CallFinish(Call),
    /// Builds the callee frame and schedules it as a new process.
    AsyncCall(Call),
    /// Executes the receive bindings and events of a selected join clause.
    Patterns(Vec<JoinPattern>),
    ForeachInit {
        snapshot: LocalId,
        cursor: LocalId,
        set: Expr,
    },
    ForeachNext {
        var: LocalId,
        snapshot: LocalId,
        cursor: LocalId,
    },
    /// Stores the return value.
    Return(Expr),
}

impl BlockStmt {
    /// Short description used in labels and logs.
    pub fn describe(&self) -> String {
        match self {
            BlockStmt::Assign(..) => "assign".to_owned(),
            BlockStmt::Send { .. } => "send".to_owned(),
            BlockStmt::Event { .. } => "event".to_owned(),
            BlockStmt::Assert { .. } => "assert".to_owned(),
            BlockStmt::Assume(_) => "assume".to_owned(),
            BlockStmt::Accept(_) => "accept".to_owned(),
            BlockStmt::Trace { format, .. } => format!("trace \"{format}\""),
            BlockStmt::Raise(e) => format!("raise {e}"),
            BlockStmt::Catch => "catch".to_owned(),
            BlockStmt::ChooseStart(_) => "choose start".to_owned(),
            BlockStmt::ChooseFinish(_) => "choose finish".to_owned(),
            BlockStmt::CallStart(call) => format!("call {} start", call.callee),
            BlockStmt::CallFinish(call) => format!("call {} finish", call.callee),
            BlockStmt::AsyncCall(call) => format!("async call {}", call.callee),
            BlockStmt::Patterns(_) => "join patterns".to_owned(),
            BlockStmt::ForeachInit { .. } => "foreach init".to_owned(),
            BlockStmt::ForeachNext { .. } => "foreach next".to_owned(),
            BlockStmt::Return(_) => "return value".to_owned(),
        }
    }
}

/// Branch conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Expr(Expr),
    /// The pending exception is the given one.
    ExceptionIs(Ident),
    /// A foreach loop has elements left.
    HasNext { snapshot: LocalId, cursor: LocalId },
}

/// How a block transfers control once its statement is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Transfer {
    /// Placeholder while the successor is not yet known.
    Unset,
    Jump(BlockId),
    Branch {
        cond: Cond,
        then: BlockId,
        otherwise: BlockId,
    },
    /// One successor per join clause, taken after selection.
    Select(Vec<BlockId>),
    /// Method exit.
    Return,
    /// Takes the exception edge of the block.
    Raise,
}

impl Transfer {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Transfer::Unset | Transfer::Return | Transfer::Raise => Vec::new(),
            Transfer::Jump(next) => vec![*next],
            Transfer::Branch {
                then, otherwise, ..
            } => vec![*then, *otherwise],
            Transfer::Select(arms) => arms.clone(),
        }
    }

    pub(crate) fn retarget(&mut self, f: impl Fn(BlockId) -> BlockId) {
        match self {
            Transfer::Unset | Transfer::Return | Transfer::Raise => {}
            Transfer::Jump(next) => *next = f(*next),
            Transfer::Branch {
                then, otherwise, ..
            } => {
                *then = f(*then);
                *otherwise = f(*otherwise);
            }
            Transfer::Select(arms) => arms.iter_mut().for_each(|arm| *arm = f(*arm)),
        }
    }
}

/// Where a raised exception goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEdge {
    /// Innermost enclosing handler dispatch, [`None`] for the method exceptional exit.
    pub handler: Option<BlockId>,
    pub atomic_delta: i32,
}

/// Join reference of the blocks lowered from a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRef {
    pub select: usize,
    /// [`None`] on the guard block, the clause index on pattern blocks.
    pub clause: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub stmt: Option<BlockStmt>,
    pub transfer: Transfer,
    /// Atomic nesting level at which the block executes, relative to method entry.
    pub level: u32,
    /// Change of atomic level on leaving the block normally (`RelativeAtomicLevel`).
    pub atomic_delta: i32,
    /// Leaving the block is not a scheduler-visible suspension point.
    pub middle_of_transition: bool,
    pub is_atomic_entry: bool,
    pub is_entry: bool,
    pub is_yield: bool,
    pub scope: ScopeId,
    pub join: Option<JoinRef>,
    pub exception: Option<ExceptionEdge>,
    pub label: Option<Ident>,
    pub span: Span,
    pub attributes: Vec<Attribute>,
}

impl BasicBlock {
    pub fn is_return(&self) -> bool {
        matches!(self.transfer, Transfer::Return)
    }

    pub fn is_guard(&self) -> bool {
        matches!(self.join, Some(JoinRef { clause: None, .. }))
    }

    /// No statement, no side effects, and a single unconditional successor.
    pub fn is_trivial(&self) -> bool {
        self.stmt.is_none()
            && self.join.is_none()
            && self.attributes.is_empty()
            && matches!(self.transfer, Transfer::Jump(_))
    }
}

/// Bookkeeping of a lowered select.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectInfo {
    pub guard: BlockId,
    pub end: bool,
    /// Patterns of each clause, all of them must be enabled.
    pub clauses: Vec<Vec<JoinPattern>>,
    pub pattern_blocks: Vec<BlockId>,
}
