//! The step-machine emitted for a method.
//!
//! A [`StepMachine`] is plain data: an enumeration of block symbols,
//! one [`StepProcedure`] per block, and the tables a scheduler queries to drive it.
//! A trivial dispatch loop executes it one procedure at a time,
//! starting from [`BlockSymbol::ENTER`].

use crate::error::LowerError;
use crate::ir::{Op, PatternGuard, RExpr};
use crate::program::{Attribute, Ident, Span, Type, Val};
use crate::scope::{LocalId, ScopeId};
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A member of the Blocks enumeration of a method.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct BlockSymbol(pub u32);

impl BlockSymbol {
    /// The reserved symbol of the entry block.
    pub const ENTER: BlockSymbol = BlockSymbol(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ENTER {
            write!(f, "Enter")
        } else {
            write!(f, "B{}", self.0)
        }
    }
}

/// A control transfer out of a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub target: BlockSymbol,
    /// Change of the atomicity counter.
    pub atomic_delta: i32,
    /// The transfer is not a suspension point.
    pub middle_of_transition: bool,
    /// Cleanup procedures to run, one per scope exited, innermost first.
    pub cleanups: SmallVec<[usize; 2]>,
}

/// Where a raised exception leaves a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionExit {
    /// Handler dispatch block, [`None`] for the method exceptional exit.
    pub target: Option<BlockSymbol>,
    pub atomic_delta: i32,
    pub middle_of_transition: bool,
    pub cleanups: SmallVec<[usize; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Epilogue {
    Goto(Edge),
    Branch {
        cond: RExpr,
        then: Edge,
        otherwise: Edge,
    },
    /// One edge per join clause; the scheduler-selected one is taken.
    Select(Vec<Edge>),
    /// Method exit sequence.
    Return { atomic_delta: i32 },
    /// Takes the exception exit.
    Raise,
}

impl Epilogue {
    pub fn edges(&self) -> Vec<&Edge> {
        match self {
            Epilogue::Goto(edge) => vec![edge],
            Epilogue::Branch {
                then, otherwise, ..
            } => vec![then, otherwise],
            Epilogue::Select(edges) => edges.iter().collect(),
            Epilogue::Return { .. } | Epilogue::Raise => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepProcedure {
    pub symbol: BlockSymbol,
    pub name: String,
    /// Attribute side effects, in source order.
    pub traces: Vec<Attribute>,
    pub body: Vec<Op>,
    pub epilogue: Epilogue,
    pub on_exception: Option<ExceptionExit>,
}

/// Resets the locals of a scope to their zero values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupProcedure {
    pub name: String,
    pub scope: ScopeId,
    pub resets: Vec<(LocalId, Val)>,
}

/// The runnability predicate of a guard block:
/// one mask bit per join clause, set when all the clause's patterns are enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnableEntry {
    pub guard: BlockSymbol,
    pub clauses: Vec<Vec<PatternGuard>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub name: Ident,
    pub ty: Type,
    pub zero: Val,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalSlot {
    pub name: Ident,
    pub ty: Type,
    pub scope: ScopeId,
    pub zero: Val,
}

/// Inputs, Outputs and Locals containers of the method's call frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameLayout {
    pub type_id: u32,
    pub inputs: Vec<Slot>,
    pub outputs: Vec<Slot>,
    pub ret: Option<Slot>,
    pub locals: Vec<LocalSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepMachine {
    pub method: Ident,
    /// Names of the Blocks enumeration, indexed by symbol.
    pub blocks: Vec<String>,
    /// One procedure per block, indexed by symbol.
    pub procedures: Vec<StepProcedure>,
    /// Non-entry block symbol to the index of its procedure.
    pub dispatch: BTreeMap<BlockSymbol, usize>,
    pub runnable: BTreeMap<BlockSymbol, RunnableEntry>,
    pub atomic_entry: BTreeSet<BlockSymbol>,
    pub valid_end_state: BTreeSet<BlockSymbol>,
    pub context: BTreeMap<BlockSymbol, Span>,
    pub context_attributes: BTreeMap<BlockSymbol, Vec<Attribute>>,
    pub cleanups: Vec<CleanupProcedure>,
    pub layout: FrameLayout,
}

impl StepMachine {
    pub fn procedure(&self, symbol: BlockSymbol) -> Option<&StepProcedure> {
        if symbol == BlockSymbol::ENTER {
            self.procedures.first()
        } else {
            self.dispatch
                .get(&symbol)
                .and_then(|&idx| self.procedures.get(idx))
        }
    }

    pub fn is_guard(&self, symbol: BlockSymbol) -> bool {
        self.runnable
            .get(&symbol)
            .is_some_and(|entry| entry.guard == symbol)
    }

    /// Cross-checks the tables against the Blocks enumeration.
    ///
    /// Dispatch must cover every non-entry block exactly once and never the entry,
    /// every table key must be a block symbol,
    /// and every edge must lead to a block and name existing cleanups.
    pub fn validate(&self) -> Result<(), LowerError> {
        let len = self.blocks.len();
        let mut names = BTreeSet::new();
        for name in &self.blocks {
            if !names.insert(name.as_str()) {
                return Err(LowerError::DuplicateSymbol(name.clone()));
            }
        }
        if self.procedures.len() != len {
            return Err(LowerError::IncompleteDispatch(self.method.clone()));
        }
        for (idx, procedure) in self.procedures.iter().enumerate() {
            if procedure.symbol.index() != idx {
                return Err(LowerError::IncompleteDispatch(procedure.symbol.to_string()));
            }
        }

        if self.dispatch.contains_key(&BlockSymbol::ENTER) {
            return Err(LowerError::IncompleteDispatch(BlockSymbol::ENTER.to_string()));
        }
        for idx in 1..len {
            let symbol = BlockSymbol(idx as u32);
            match self.dispatch.get(&symbol) {
                Some(&proc) if self.procedures.get(proc).map(|p| p.symbol) == Some(symbol) => {}
                _ => return Err(LowerError::IncompleteDispatch(symbol.to_string())),
            }
        }
        if self.dispatch.len() != len.saturating_sub(1) {
            return Err(LowerError::IncompleteDispatch(self.method.clone()));
        }

        let check_key = |table: &'static str, symbol: &BlockSymbol| {
            if symbol.index() < len {
                Ok(())
            } else {
                Err(LowerError::TableKey(table, symbol.to_string()))
            }
        };
        self.runnable.keys().try_for_each(|k| check_key("runnable", k))?;
        self.runnable
            .values()
            .try_for_each(|entry| check_key("runnable", &entry.guard))?;
        self.atomic_entry
            .iter()
            .try_for_each(|k| check_key("atomic_entry", k))?;
        self.valid_end_state
            .iter()
            .try_for_each(|k| check_key("valid_end_state", k))?;
        self.context.keys().try_for_each(|k| check_key("context", k))?;
        self.context_attributes
            .keys()
            .try_for_each(|k| check_key("context_attributes", k))?;

        for procedure in &self.procedures {
            let span = self.context.get(&procedure.symbol).copied().unwrap_or_default();
            let missing = || LowerError::MissingTarget(procedure.symbol.to_string(), span);
            for edge in procedure.epilogue.edges() {
                if edge.target.index() >= len
                    || edge.cleanups.iter().any(|&c| c >= self.cleanups.len())
                {
                    return Err(missing());
                }
            }
            if let Some(exit) = &procedure.on_exception {
                if exit.target.is_some_and(|t| t.index() >= len)
                    || exit.cleanups.iter().any(|&c| c >= self.cleanups.len())
                {
                    return Err(missing());
                }
            } else if procedure.epilogue == Epilogue::Raise {
                return Err(LowerError::Unterminated(procedure.symbol.to_string(), span));
            }
        }
        Ok(())
    }
}
