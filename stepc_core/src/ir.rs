//! Primitive runtime operations produced by the normalizer.
//!
//! Identifiers are resolved against the flat runtime layout of a call frame:
//! the globals container, the frame's locals, inputs and outputs,
//! the return value and the receiver of the call.

use crate::program::{BinOp, Ident, Integer, Type, UnOp, Val};
use crate::scope::LocalId;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize)]
pub enum PlaceBase {
    Global(u16),
    Local(LocalId),
    Input(u16),
    Output(u16),
    ReturnValue,
    /// The receiver recorded by the caller.
    Receiver,
}

/// A storage location: a container slot followed by a flat chain of struct fields.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize)]
pub struct Place {
    pub base: PlaceBase,
    pub path: Vec<Ident>,
}

impl Place {
    pub fn new(base: PlaceBase) -> Self {
        Self {
            base,
            path: Vec::new(),
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            PlaceBase::Global(idx) => write!(f, "globals[{idx}]")?,
            PlaceBase::Local(local) => write!(f, "locals[{}]", local.index())?,
            PlaceBase::Input(idx) => write!(f, "inputs[{idx}]")?,
            PlaceBase::Output(idx) => write!(f, "outputs[{idx}]")?,
            PlaceBase::ReturnValue => write!(f, "ret")?,
            PlaceBase::Receiver => write!(f, "this")?,
        }
        for field in &self.path {
            write!(f, ".{field}")?;
        }
        Ok(())
    }
}

/// Normalized expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RExpr {
    Const(Val),
    Read(Place),
    Unary(UnOp, Box<RExpr>),
    Binary(BinOp, Box<RExpr>, Box<RExpr>),
    SetLit(Vec<RExpr>),
    /// Set membership: element, then set.
    Contains(Box<RExpr>, Box<RExpr>),
    Size(Box<RExpr>),
    /// Element of a set at an index of its iteration order.
    ElementAt(Box<RExpr>, Box<RExpr>),
    /// The pending exception of the frame is the given one.
    ExceptionIs(Ident),
}

/// The domain published by the first half of a choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChoiceDomain {
    Bool,
    /// Inclusive range.
    Range(Integer, Integer),
    /// An enum type, whose values are the ordinals of its variants.
    Enum { name: Ident, variants: usize },
    /// The elements of a computed set.
    Set(RExpr),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Op {
    Assign(Place, RExpr),
    Send {
        chan: RExpr,
        msg: RExpr,
    },
    /// Dequeues a message and binds it; `ty` is the type the message must inhabit, if known.
    Receive {
        chan: RExpr,
        target: Place,
        ty: Option<Type>,
    },
    Event {
        code: RExpr,
        value: RExpr,
        external: bool,
    },
    Assert {
        cond: RExpr,
        message: Option<String>,
    },
    Assume(RExpr),
    Accept(RExpr),
    Trace {
        format: String,
        args: Vec<RExpr>,
    },
    SetException(Ident),
    ClearException,
    ChooseStart(ChoiceDomain),
    ChooseFinish(Place),
    /// Constructs the call frame of the callee.
    NewFrame {
        callee: Ident,
    },
    CopyIn {
        index: u16,
        value: RExpr,
    },
    SetReceiver(RExpr),
    /// Runs the callee frame, blocking the caller until it completes.
    Invoke,
    /// Hands the callee frame over as a new process.
    Schedule,
    /// Propagates the exception the callee completed with, if any.
    Rethrow,
    CopyOut {
        index: u16,
        target: Place,
    },
    CopyReturn(Place),
    ReleaseFrame,
    ForeachInit {
        snapshot: LocalId,
        cursor: LocalId,
        set: RExpr,
    },
    /// Binds the element at the cursor and advances the cursor.
    ForeachNext {
        var: LocalId,
        element: RExpr,
        cursor: LocalId,
    },
}

/// Runnability test of a single join pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PatternGuard {
    /// The channel holds a message at its front inhabiting the type, if known.
    ChannelReady { chan: RExpr, ty: Option<Type> },
    Wait(RExpr),
    Always,
}
