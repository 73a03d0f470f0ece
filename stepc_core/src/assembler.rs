//! State-machine assembler.
//!
//! Consumes the blocks and scopes of a split method, together with their normalized content,
//! and emits a [`StepMachine`]:
//! symbols, step-procedures with their control-transfer epilogues,
//! the Dispatch, Runnable, AtomicEntry, ValidEndState, Context and ContextAttribute tables,
//! and the scope-cleanup procedures.

use crate::block::{BasicBlock, BlockId, Transfer};
use crate::error::LowerError;
use crate::normalizer::Normalized;
use crate::program::{Method, Span};
use crate::scope::{ScopeId, ScopeTree};
use crate::session::Session;
use crate::splitter::SplitMethod;
use crate::step_machine::*;
use crate::types::TypeTable;
use hashbrown::HashMap;
use log::{info, trace};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

fn symbol(id: BlockId) -> BlockSymbol {
    BlockSymbol(id.index() as u32)
}

pub fn assemble(
    split: &SplitMethod,
    normalized: Normalized,
    method: &Method,
    types: &TypeTable,
    session: &mut Session,
) -> Result<StepMachine, LowerError> {
    let cleanups = cleanup_procedures(&method.name, &split.scopes, types)?;
    let cleanup_index = cleanups
        .iter()
        .enumerate()
        .map(|(idx, cleanup)| (cleanup.scope, idx))
        .collect::<HashMap<_, _>>();
    let assembler = Assembler {
        split,
        cleanup_index,
    };

    let blocks = split
        .blocks
        .iter()
        .map(|block| symbol(block.id).to_string())
        .collect::<Vec<_>>();

    let Normalized {
        ops,
        mut conds,
        guards,
    } = normalized;
    let mut procedures = Vec::with_capacity(split.blocks.len());
    for (block, body) in split.blocks.iter().zip(ops) {
        let epilogue = assembler.epilogue(block, conds[block.id.index()].take())?;
        let on_exception = block.exception.map(|edge| {
            let handler_scope = edge
                .handler
                .map_or(ScopeTree::METHOD, |h| split.block(h).scope);
            let level_after = block.level as i32 + edge.atomic_delta;
            ExceptionExit {
                target: edge.handler.map(symbol),
                atomic_delta: edge.atomic_delta,
                middle_of_transition: edge.handler.is_some() && level_after > 0,
                // The frame is released on the exceptional exit.
                cleanups: if edge.handler.is_some() {
                    assembler.cleanups(block.scope, handler_scope)
                } else {
                    SmallVec::new()
                },
            }
        });
        procedures.push(StepProcedure {
            symbol: symbol(block.id),
            name: format!("{}_{}", method.name, symbol(block.id)),
            traces: block.attributes.clone(),
            body,
            epilogue,
            on_exception,
        });
    }

    let dispatch = split
        .blocks
        .iter()
        .filter(|block| !block.is_entry)
        .map(|block| (symbol(block.id), block.id.index()))
        .collect::<BTreeMap<_, _>>();

    let mut runnable = BTreeMap::new();
    let mut valid_end_state = BTreeSet::new();
    for (info, clauses) in split.selects.iter().zip(guards) {
        let entry = RunnableEntry {
            guard: symbol(info.guard),
            clauses,
        };
        for block in assembler.guarded(info.guard) {
            runnable.insert(symbol(block), entry.clone());
            if info.end {
                valid_end_state.insert(symbol(block));
            }
        }
    }

    let atomic_entry = split
        .blocks
        .iter()
        .filter(|block| block.is_atomic_entry)
        .map(|block| symbol(block.id))
        .collect::<BTreeSet<_>>();

    let fallback = method.span.closing();
    let context = split
        .blocks
        .iter()
        .map(|block| (symbol(block.id), assembler.context(block.id, fallback)))
        .collect::<BTreeMap<_, _>>();
    let context_attributes = split
        .blocks
        .iter()
        .filter(|block| !block.attributes.is_empty())
        .map(|block| (symbol(block.id), block.attributes.clone()))
        .collect::<BTreeMap<_, _>>();

    let layout = frame_layout(method, &split.scopes, types, session)?;

    if session.options.dump_labels {
        for block in &split.blocks {
            let label = label(block, session);
            session.record_label(format!("{}.{}", method.name, symbol(block.id)), label);
        }
    }

    let machine = StepMachine {
        method: method.name.clone(),
        blocks,
        procedures,
        dispatch,
        runnable,
        atomic_entry,
        valid_end_state,
        context,
        context_attributes,
        cleanups,
        layout,
    };
    machine.validate()?;
    info!(
        "method {}: {} blocks, {} guards, {} atomic entries, {} cleanups",
        machine.method,
        machine.blocks.len(),
        machine.runnable.len(),
        machine.atomic_entry.len(),
        machine.cleanups.len()
    );
    Ok(machine)
}

struct Assembler<'a> {
    split: &'a SplitMethod,
    cleanup_index: HashMap<ScopeId, usize>,
}

impl Assembler<'_> {
    fn epilogue(
        &self,
        block: &BasicBlock,
        cond: Option<crate::ir::RExpr>,
    ) -> Result<Epilogue, LowerError> {
        match &block.transfer {
            Transfer::Unset => Err(LowerError::Unterminated(
                block.id.to_string(),
                block.span,
            )),
            Transfer::Jump(target) => Ok(Epilogue::Goto(self.edge(block, *target))),
            Transfer::Branch {
                then, otherwise, ..
            } => Ok(Epilogue::Branch {
                cond: cond.ok_or_else(|| {
                    LowerError::Unterminated(block.id.to_string(), block.span)
                })?,
                then: self.edge(block, *then),
                otherwise: self.edge(block, *otherwise),
            }),
            Transfer::Select(arms) => Ok(Epilogue::Select(
                arms.iter().map(|arm| self.edge(block, *arm)).collect(),
            )),
            Transfer::Return => Ok(Epilogue::Return {
                atomic_delta: block.atomic_delta,
            }),
            Transfer::Raise => Ok(Epilogue::Raise),
        }
    }

    fn edge(&self, block: &BasicBlock, target: BlockId) -> Edge {
        let cleanups = self.cleanups(block.scope, self.split.block(target).scope);
        trace!(
            "{} -> {target}: delta {}, cleanups {:?}",
            block.id,
            block.atomic_delta,
            cleanups
        );
        Edge {
            target: symbol(target),
            atomic_delta: block.atomic_delta,
            middle_of_transition: block.middle_of_transition,
            cleanups,
        }
    }

    /// One cleanup per exited scope owning locals.
    fn cleanups(&self, from: ScopeId, to: ScopeId) -> SmallVec<[usize; 2]> {
        self.split
            .scopes
            .exited(from, to)
            .into_iter()
            .filter_map(|scope| self.cleanup_index.get(&scope).copied())
            .collect()
    }

    /// The guard block together with the trivial predecessors flowing into it without suspension.
    fn guarded(&self, guard: BlockId) -> Vec<BlockId> {
        let mut guarded = vec![guard];
        let mut idx = 0;
        while idx < guarded.len() {
            let target = guarded[idx];
            for block in &self.split.blocks {
                if block.is_trivial()
                    && block.middle_of_transition
                    && block.transfer == Transfer::Jump(target)
                    && !guarded.contains(&block.id)
                {
                    guarded.push(block.id);
                }
            }
            idx += 1;
        }
        guarded
    }

    /// Best available source range of a block, falling back through trivial successors.
    fn context(&self, id: BlockId, fallback: Span) -> Span {
        let mut current = id;
        let mut visited = Vec::new();
        loop {
            let block = self.split.block(current);
            if !block.span.is_unknown() {
                return block.span;
            }
            visited.push(current);
            match block.transfer {
                Transfer::Jump(next) if block.is_trivial() && !visited.contains(&next) => {
                    current = next;
                }
                _ => return fallback,
            }
        }
    }
}

fn cleanup_procedures(
    method: &str,
    scopes: &ScopeTree,
    types: &TypeTable,
) -> Result<Vec<CleanupProcedure>, LowerError> {
    let mut cleanups = Vec::new();
    // The method scope is only exited on return, when the whole frame goes.
    for scope in scopes.scopes().filter(|&s| s != ScopeTree::METHOD) {
        let owned = scopes.owned(scope);
        if owned.is_empty() {
            continue;
        }
        let resets = owned
            .iter()
            .map(|&local| types.zero(&scopes.local(local).ty).map(|zero| (local, zero)))
            .collect::<Result<Vec<_>, _>>()?;
        cleanups.push(CleanupProcedure {
            name: format!("{method}_cleanup{}", scope.index()),
            scope,
            resets,
        });
    }
    Ok(cleanups)
}

fn frame_layout(
    method: &Method,
    scopes: &ScopeTree,
    types: &TypeTable,
    session: &mut Session,
) -> Result<FrameLayout, LowerError> {
    let slot = |name: &str, ty: &crate::program::Type| -> Result<Slot, LowerError> {
        types.check(ty)?;
        Ok(Slot {
            name: name.to_owned(),
            ty: ty.clone(),
            zero: types.zero(ty)?,
        })
    };
    let inputs = method
        .params
        .iter()
        .map(|p| slot(&p.name, &p.ty))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = method
        .outputs
        .iter()
        .map(|p| slot(&p.name, &p.ty))
        .collect::<Result<Vec<_>, _>>()?;
    let ret = method
        .ret
        .as_ref()
        .map(|ty| slot("ret", ty))
        .transpose()?;
    let locals = scopes
        .locals()
        .map(|(_, info)| {
            Ok(LocalSlot {
                name: info.name.clone(),
                ty: info.ty.clone(),
                scope: info.scope,
                zero: types.zero(&info.ty)?,
            })
        })
        .collect::<Result<Vec<_>, LowerError>>()?;
    Ok(FrameLayout {
        type_id: session.fresh_type_id(),
        inputs,
        outputs,
        ret,
        locals,
    })
}

fn label(block: &BasicBlock, session: &Session) -> String {
    let what = if let Some(label) = &block.label {
        format!("{label}:")
    } else if let Some(stmt) = &block.stmt {
        stmt.describe()
    } else if block.is_entry {
        "enter".to_owned()
    } else if block.is_guard() {
        "select guard".to_owned()
    } else if block.is_yield {
        "yield".to_owned()
    } else {
        match (&block.transfer, block.atomic_delta) {
            (Transfer::Return, _) => "return".to_owned(),
            (Transfer::Raise, _) => "reraise".to_owned(),
            (Transfer::Branch { .. }, _) => "branch".to_owned(),
            (_, 1) => "atomic entry".to_owned(),
            (_, -1) => "atomic exit".to_owned(),
            _ => "jump".to_owned(),
        }
    };
    format!("{what} @ {}", session.render(block.span))
}
