//! Internal-consistency checks on split methods.
//!
//! A failed check is a defect of the splitter, never of the user program.

use crate::block::{BlockId, JoinRef, Transfer};
use crate::error::LowerError;
use crate::splitter::SplitMethod;
use log::trace;
use std::collections::VecDeque;

/// Checks terminal markers, edge targets, reachability, atomic telescoping and join pairing.
pub fn check_split(split: &SplitMethod) -> Result<(), LowerError> {
    check_edges(split)?;
    check_levels(split)?;
    check_joins(split)
}

fn check_edges(split: &SplitMethod) -> Result<(), LowerError> {
    for block in &split.blocks {
        match block.transfer {
            Transfer::Unset => {
                return Err(LowerError::Unterminated(block.id.to_string(), block.span));
            }
            Transfer::Raise if block.exception.is_none() => {
                return Err(LowerError::Unterminated(block.id.to_string(), block.span));
            }
            _ => {}
        }
        if split
            .successors(block.id)
            .any(|succ| succ.index() >= split.blocks.len())
        {
            return Err(LowerError::MissingTarget(block.id.to_string(), block.span));
        }
    }
    Ok(())
}

/// Walks the blocks from the entry, tracking the atomic level,
/// which doubles as the reachability check.
fn check_levels(split: &SplitMethod) -> Result<(), LowerError> {
    let mut levels: Vec<Option<i32>> = vec![None; split.blocks.len()];
    let mut queue = VecDeque::from([(split.entry, 0)]);
    while let Some((id, level)) = queue.pop_front() {
        let block = split.block(id);
        match levels[id.index()] {
            Some(known) if known == level => continue,
            Some(_) => {
                return Err(LowerError::AtomicMismatch(id.to_string(), block.span));
            }
            None if block.level as i32 != level => {
                return Err(LowerError::AtomicMismatch(id.to_string(), block.span));
            }
            None => levels[id.index()] = Some(level),
        }
        trace!("{id} reached at atomic level {level}");

        let after = level + block.atomic_delta;
        match &block.transfer {
            Transfer::Return if after != 0 => {
                return Err(LowerError::AtomicMismatch(id.to_string(), block.span));
            }
            _ => {
                for succ in block.transfer.successors() {
                    queue.push_back((succ, after));
                }
            }
        }
        if let Some(edge) = block.exception {
            let after = level + edge.atomic_delta;
            match edge.handler {
                Some(handler) => queue.push_back((handler, after)),
                None if after != 0 => {
                    return Err(LowerError::AtomicMismatch(id.to_string(), block.span));
                }
                None => {}
            }
        }
    }
    match levels.iter().position(Option::is_none) {
        Some(idx) => Err(LowerError::Unreachable(
            split.blocks[idx].id.to_string(),
            split.blocks[idx].span,
        )),
        None => Ok(()),
    }
}

/// Guard and pattern blocks come in pairs,
/// and pattern blocks are only reached from their guard.
fn check_joins(split: &SplitMethod) -> Result<(), LowerError> {
    let mut owner: Vec<Option<BlockId>> = vec![None; split.blocks.len()];
    for (index, info) in split.selects.iter().enumerate() {
        let guard = split.block(info.guard);
        if guard.join
            != Some(JoinRef {
                select: index,
                clause: None,
            })
            || guard.transfer != Transfer::Select(info.pattern_blocks.clone())
            || info.pattern_blocks.len() != info.clauses.len()
        {
            return Err(LowerError::JoinPairing(guard.id.to_string(), guard.span));
        }
        for (clause, pattern) in info.pattern_blocks.iter().enumerate() {
            if split.block(*pattern).join
                != Some(JoinRef {
                    select: index,
                    clause: Some(clause),
                })
            {
                return Err(LowerError::JoinPairing(
                    pattern.to_string(),
                    split.block(*pattern).span,
                ));
            }
            owner[pattern.index()] = Some(guard.id);
        }
    }
    for block in &split.blocks {
        match block.join {
            Some(JoinRef {
                select,
                clause: None,
            }) if split.selects.get(select).map(|info| info.guard) != Some(block.id) => {
                return Err(LowerError::JoinPairing(block.id.to_string(), block.span));
            }
            Some(JoinRef {
                clause: Some(_), ..
            }) if owner[block.id.index()].is_none() => {
                return Err(LowerError::JoinPairing(block.id.to_string(), block.span));
            }
            _ => {}
        }
        for succ in split.successors(block.id) {
            if let Some(guard) = owner[succ.index()] {
                if guard != block.id {
                    return Err(LowerError::JoinPairing(
                        succ.to_string(),
                        split.block(succ).span,
                    ));
                }
            }
        }
    }
    Ok(())
}
