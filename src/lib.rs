//! stepc lowers the methods of a concurrent state-machine modeling language into step-machines:
//! small resumable procedures linked by an explicit instruction pointer,
//! so that a model checker can suspend, checkpoint and interleave processes at every scheduler-visible point.
//!
//! Compilation units are read from the JSON interchange format of [`stepc_json`]
//! and lowered by [`stepc_core`].

mod cli;

pub use cli::Cli;
pub use stepc_core;
pub use stepc_json;

use std::fmt;
use stepc_core::StepMachine;

/// Per-method figures printed by the command line tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub method: String,
    pub blocks: usize,
    pub guards: usize,
    pub atomic_entries: usize,
    pub valid_end_states: usize,
    pub cleanups: usize,
}

impl From<&StepMachine> for Summary {
    fn from(machine: &StepMachine) -> Self {
        Self {
            method: machine.method.clone(),
            blocks: machine.blocks.len(),
            guards: machine
                .runnable
                .keys()
                .filter(|&&symbol| machine.is_guard(symbol))
                .count(),
            atomic_entries: machine.atomic_entry.len(),
            valid_end_states: machine.valid_end_state.len(),
            cleanups: machine.cleanups.len(),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} blocks, {} guards, {} atomic entries, {} valid end states, {} cleanups",
            self.method,
            self.blocks,
            self.guards,
            self.atomic_entries,
            self.valid_end_states,
            self.cleanups
        )
    }
}
