//! Lowering of structured methods of a concurrent modeling language into checkpointable step-machines.
//!
//! Every method body is turned into a set of small step procedures linked by an explicit instruction pointer,
//! whose boundaries coincide with the points where a scheduler may suspend the process, preempt it,
//! or record a nondeterministic choice.
//! The pipeline of a method is:
//!
//! - [`splitter`]: cut the statement tree into basic blocks annotated with scheduling metadata;
//! - [`check`]: verify the internal consistency of the blocks;
//! - [`normalizer`]: resolve identifiers against the flat frame layout and lower calls, choices and fields into primitive operations;
//! - [`assembler`]: emit the [`StepMachine`] with its tables and scope-cleanup procedures.
//!
//! The [`exec`] module provides a reference dispatch loop over the emitted step-machines.
//!
//! ```
//! # use stepc_core::program::*;
//! # use stepc_core::session::Session;
//! let unit = CompilationUnit {
//!     name: "demo".to_owned(),
//!     methods: vec![Method::new("main", vec![Stmt::yield_now()])],
//!     ..Default::default()
//! };
//! let mut session = Session::default();
//! let compiled = stepc_core::compile_unit(&unit, &mut session).expect("compile");
//! let machine = compiled.machine("main").expect("main");
//! assert_eq!(machine.blocks[0], "Enter");
//! ```

#![forbid(unsafe_code)]

pub mod assembler;
pub mod block;
pub mod check;
mod error;
pub mod exec;
pub mod ir;
pub mod normalizer;
pub mod program;
pub mod scope;
pub mod session;
pub mod splitter;
pub mod step_machine;
pub mod types;

pub use error::LowerError;
pub use step_machine::StepMachine;

use hashbrown::HashMap;
use log::info;
use normalizer::UnitEnv;
use program::{CompilationUnit, Ident, Method};
use session::Session;
use step_machine::Slot;
use types::TypeTable;

/// The lowered compilation unit: the globals container and one step-machine per method.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub name: Ident,
    pub types: TypeTable,
    /// Globals with their initial values.
    pub globals: Vec<Slot>,
    pub machines: Vec<StepMachine>,
    index: HashMap<Ident, usize>,
}

impl CompiledUnit {
    pub fn machine_index(&self, method: &str) -> Option<usize> {
        self.index.get(method).copied()
    }

    pub fn machine(&self, method: &str) -> Option<&StepMachine> {
        self.machine_index(method).map(|idx| &self.machines[idx])
    }

    pub fn global_index(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|g| g.name == name)
    }
}

/// Lowers every method of the unit.
///
/// The first internal error aborts the whole unit.
/// User diagnostics are accumulated in the session.
pub fn compile_unit(
    unit: &CompilationUnit,
    session: &mut Session,
) -> Result<CompiledUnit, LowerError> {
    info!(
        "compiling unit {} ({} methods)",
        unit.name,
        unit.methods.len()
    );
    for document in &unit.documents {
        session.add_document(document.clone())?;
    }
    let types = TypeTable::new(&unit.types)?;
    let machines = {
        let env = UnitEnv::new(unit, &types)?;
        unit.methods
            .iter()
            .map(|method| {
                compile_method(method, &env, session).map_err(|err| err.in_method(&method.name))
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    let globals = unit
        .globals
        .iter()
        .map(|global| {
            Ok(Slot {
                name: global.name.clone(),
                ty: global.ty.clone(),
                zero: match &global.init {
                    Some(init) => init.clone(),
                    None => types.zero(&global.ty)?,
                },
            })
        })
        .collect::<Result<Vec<_>, LowerError>>()?;
    let index = machines
        .iter()
        .enumerate()
        .map(|(idx, machine)| (machine.method.clone(), idx))
        .collect();
    Ok(CompiledUnit {
        name: unit.name.clone(),
        types,
        globals,
        machines,
        index,
    })
}

/// Lowers one method: split, check, normalize and assemble.
pub fn compile_method(
    method: &Method,
    env: &UnitEnv,
    session: &mut Session,
) -> Result<StepMachine, LowerError> {
    let split = splitter::split(method, env.types, session)?;
    check::check_split(&split)?;
    let normalized = normalizer::normalize(&split, method, env)?;
    assembler::assemble(&split, normalized, method, env.types, session)
}
