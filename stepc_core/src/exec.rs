//! Reference executor of step-machines.
//!
//! A [`Process`] is a stack of call [`Frame`]s plus the atomicity counter and the `MiddleOfTransition` flag.
//! [`Process::step`] runs step procedures through the dispatch table
//! until the process reaches a suspension point, requests a choice, blocks on a guard or completes.
//! The [`World`] holds globals and FIFO channel queues, and collects the observable effects in order.
//!
//! Both are plain values: a snapshot is a clone, restoring it is an assignment,
//! and two executions reaching the same state compare equal.
//! There is no interleaving search here, processes are driven explicitly.
//!
//! ```
//! # use stepc_core::program::*;
//! # use stepc_core::session::Session;
//! # use stepc_core::exec::{Process, Status, World};
//! // x = choose(bool); trace("{}", x);
//! let mut main = Method::new("main", vec![
//!     Stmt::assign(Expr::ident("x"), Expr::choose(ChooseDomain::Bool)),
//!     Stmt::trace("{}", vec![Expr::ident("x")]),
//! ]);
//! main.locals.push(LocalDecl::new("x", Type::Bool));
//! let unit = CompilationUnit { methods: vec![main], ..Default::default() };
//! let compiled = stepc_core::compile_unit(&unit, &mut Session::default()).expect("compile");
//!
//! let mut world = World::new(&compiled);
//! let mut process = Process::new(&compiled, "main", Vec::new()).expect("process");
//! let status = process.run(&compiled, &mut world, |domain| domain[1].clone()).expect("run");
//! assert!(matches!(status, Status::Returned { .. }));
//! ```

use crate::CompiledUnit;
use crate::ir::{ChoiceDomain, Op, PatternGuard, Place, PlaceBase, RExpr};
use crate::program::{Attribute, BinOp, Ident, UnOp, Val};
use crate::step_machine::{BlockSymbol, Edge, Epilogue, RunnableEntry, StepMachine, StepProcedure};
use log::trace;
use smallvec::SmallVec;
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;

/// Procedures a single step may chain before it is considered divergent.
const MAX_TRANSITION: usize = 1 << 16;

/// Steps [`Process::run`] may take.
const MAX_STEPS: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("the process is not running")]
    NotRunning,
    #[error("the process is waiting for a choice")]
    AwaitingChoice,
    #[error("the process is not waiting for a choice")]
    NotChoosing,
    #[error("value {0} is not in the choice domain")]
    NotInDomain(Val),
    #[error("choice over an empty domain")]
    EmptyDomain,
    #[error("no value was supplied for the choice")]
    NoChoice,
    #[error("unknown method {0}")]
    UnknownMethod(Ident),
    #[error("unknown global {0}")]
    UnknownGlobal(Ident),
    #[error("expected {expected} arguments, found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("no procedure for block {0}")]
    MissingBlock(BlockSymbol),
    #[error("no call frame")]
    NoFrame,
    #[error("place {0} does not exist")]
    BadPlace(String),
    #[error("no field {0}")]
    NoField(Ident),
    #[error("operand mismatch in {0}")]
    TypeMismatch(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("null or unknown channel")]
    NullChannel,
    #[error("channel {0} has no compatible message")]
    ChannelNotReady(u32),
    #[error("no join clause was selected")]
    NoSelection,
    #[error("join clause {0} is not enabled")]
    NotEnabled(usize),
    #[error("blocked at {0}")]
    Blocked(BlockSymbol),
    #[error("block {0} has no exception exit")]
    NoExceptionExit(BlockSymbol),
    #[error("the callee has no return value")]
    NoReturnValue,
    #[error("execution does not reach a suspension point")]
    Diverged,
}

/// Observable effects, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send { chan: u32, msg: Val },
    Receive { chan: u32, msg: Val },
    Event { code: Val, value: Val, external: bool },
    Trace(String),
    Attribute(Attribute),
    Accept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct World {
    pub globals: Vec<Val>,
    pub channels: Vec<VecDeque<Val>>,
    pub effects: Vec<Effect>,
    /// Processes created by asynchronous calls.
    pub spawned: Vec<Process>,
}

impl World {
    pub fn new(unit: &CompiledUnit) -> Self {
        Self {
            globals: unit.globals.iter().map(|g| g.zero.clone()).collect(),
            channels: Vec::new(),
            effects: Vec::new(),
            spawned: Vec::new(),
        }
    }

    /// Allocates a new empty channel.
    pub fn new_channel(&mut self) -> Val {
        self.channels.push(VecDeque::new());
        Val::Chan(Some(self.channels.len() as u32 - 1))
    }

    pub fn global(&self, unit: &CompiledUnit, name: &str) -> Result<&Val, ExecError> {
        unit.global_index(name)
            .and_then(|idx| self.globals.get(idx))
            .ok_or_else(|| ExecError::UnknownGlobal(name.to_owned()))
    }

    pub fn set_global(&mut self, unit: &CompiledUnit, name: &str, val: Val) -> Result<(), ExecError> {
        let slot = unit
            .global_index(name)
            .and_then(|idx| self.globals.get_mut(idx))
            .ok_or_else(|| ExecError::UnknownGlobal(name.to_owned()))?;
        *slot = val;
        Ok(())
    }
}

/// The reified record of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    machine: usize,
    current: BlockSymbol,
    inputs: Vec<Val>,
    outputs: Vec<Val>,
    ret: Option<Val>,
    locals: Vec<Val>,
    receiver: Option<Val>,
    exception: Option<Ident>,
    // Atomicity of the process when the frame was created.
    atomic_base: i32,
    choice: Option<Val>,
    selected: Option<usize>,
    // Callee frame under construction.
    pending: Option<Box<Frame>>,
    // Callee frame that completed.
    returned: Option<Box<Frame>>,
}

impl Frame {
    fn new(machine_idx: usize, machine: &StepMachine, atomic_base: i32) -> Self {
        let layout = &machine.layout;
        Self {
            machine: machine_idx,
            current: BlockSymbol::ENTER,
            inputs: layout.inputs.iter().map(|s| s.zero.clone()).collect(),
            outputs: layout.outputs.iter().map(|s| s.zero.clone()).collect(),
            ret: layout.ret.as_ref().map(|s| s.zero.clone()),
            locals: layout.locals.iter().map(|s| s.zero.clone()).collect(),
            receiver: None,
            exception: None,
            atomic_base,
            choice: None,
            selected: None,
            pending: None,
            returned: None,
        }
    }

    pub fn current(&self) -> BlockSymbol {
        self.current
    }

    pub fn locals(&self) -> &[Val] {
        &self.locals
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Running,
    /// Waiting for a value of the domain to be supplied.
    Choosing(Vec<Val>),
    Returned { ret: Option<Val>, outputs: Vec<Val> },
    Raised(Ident),
    /// An assertion failed.
    Failed(String),
    /// An assumption did not hold.
    Pruned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Reached a scheduler-visible suspension point.
    Suspended,
    /// No join clause of the guard ahead is enabled; the current block was not executed.
    Blocked,
    Choosing,
    /// The process returned, raised, failed or was pruned.
    Finished,
}

enum Flow {
    Next,
    Invoke,
    Raise,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    frames: Vec<Frame>,
    atomicity: i32,
    middle: bool,
    status: Status,
}

impl Process {
    pub fn new(unit: &CompiledUnit, method: &str, args: Vec<Val>) -> Result<Self, ExecError> {
        let idx = unit
            .machine_index(method)
            .ok_or_else(|| ExecError::UnknownMethod(method.to_owned()))?;
        let mut frame = Frame::new(idx, &unit.machines[idx], 0);
        if args.len() != frame.inputs.len() {
            return Err(ExecError::ArityMismatch {
                expected: frame.inputs.len(),
                found: args.len(),
            });
        }
        frame.inputs = args;
        Ok(Self::from_frame(frame))
    }

    fn from_frame(frame: Frame) -> Self {
        Self {
            frames: vec![frame],
            atomicity: 0,
            middle: false,
            status: Status::Running,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn atomicity(&self) -> i32 {
        self.atomicity
    }

    /// Whether the process is in the middle of a transition, i.e., it cannot be preempted.
    pub fn in_transition(&self) -> bool {
        self.middle
    }

    /// The innermost frame.
    pub fn frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether the scheduler may run the process now.
    pub fn runnable(&self, unit: &CompiledUnit, world: &World) -> Result<bool, ExecError> {
        if self.status != Status::Running {
            return Ok(false);
        }
        let frame = self.frames.last().ok_or(ExecError::NoFrame)?;
        match unit.machines[frame.machine].runnable.get(&frame.current) {
            Some(entry) => Ok(enabled(unit, world, frame, entry)?.contains(&true)),
            None => Ok(true),
        }
    }

    /// The runnability mask of the current block, if it is guarded.
    pub fn enabled_clauses(
        &self,
        unit: &CompiledUnit,
        world: &World,
    ) -> Result<Option<Vec<bool>>, ExecError> {
        let frame = self.frames.last().ok_or(ExecError::NoFrame)?;
        unit.machines[frame.machine]
            .runnable
            .get(&frame.current)
            .map(|entry| enabled(unit, world, frame, entry))
            .transpose()
    }

    /// Preselects the join clause taken at the next guard.
    pub fn select(&mut self, clause: usize) -> Result<(), ExecError> {
        let frame = self.frames.last_mut().ok_or(ExecError::NoFrame)?;
        frame.selected = Some(clause);
        Ok(())
    }

    /// Supplies the value of a pending choice.
    pub fn supply(&mut self, val: Val) -> Result<(), ExecError> {
        let Status::Choosing(domain) = &self.status else {
            return Err(ExecError::NotChoosing);
        };
        if !domain.contains(&val) {
            return Err(ExecError::NotInDomain(val));
        }
        let frame = self.frames.last_mut().ok_or(ExecError::NoFrame)?;
        frame.choice = Some(val);
        self.status = Status::Running;
        Ok(())
    }

    /// Runs procedures until a suspension point, a choice, a disabled guard or completion.
    pub fn step(&mut self, unit: &CompiledUnit, world: &mut World) -> Result<StepOutcome, ExecError> {
        match self.status {
            Status::Running => {}
            Status::Choosing(_) => return Err(ExecError::AwaitingChoice),
            _ => return Err(ExecError::NotRunning),
        }
        for _ in 0..MAX_TRANSITION {
            let frame = self.frames.last().ok_or(ExecError::NoFrame)?;
            let machine = &unit.machines[frame.machine];
            let symbol = frame.current;
            let procedure = machine
                .procedure(symbol)
                .ok_or(ExecError::MissingBlock(symbol))?;

            // Guards, and the blocks leading to them without leaving the transition,
            // run only if a clause is enabled; the clause is kept for the guard.
            if let Some(entry) = machine.runnable.get(&symbol) {
                let mask = enabled(unit, world, frame, entry)?;
                let clause = match frame.selected {
                    Some(clause) if mask.get(clause) == Some(&true) => clause,
                    Some(clause) => return Err(ExecError::NotEnabled(clause)),
                    None => match mask.iter().position(|&on| on) {
                        Some(clause) => clause,
                        None => return Ok(StepOutcome::Blocked),
                    },
                };
                self.select(clause)?;
            }

            self.execute(unit, world, procedure)?;
            match self.status {
                Status::Running if self.middle => {}
                Status::Running => return Ok(StepOutcome::Suspended),
                Status::Choosing(_) => return Ok(StepOutcome::Choosing),
                _ => return Ok(StepOutcome::Finished),
            }
        }
        Err(ExecError::Diverged)
    }

    /// Steps the process to completion, resolving choices with `choose`.
    pub fn run(
        &mut self,
        unit: &CompiledUnit,
        world: &mut World,
        mut choose: impl FnMut(&[Val]) -> Val,
    ) -> Result<&Status, ExecError> {
        for _ in 0..MAX_STEPS {
            match self.step(unit, world)? {
                StepOutcome::Suspended => {}
                StepOutcome::Choosing => {
                    let val = match &self.status {
                        Status::Choosing(domain) => choose(domain),
                        _ => return Err(ExecError::NotChoosing),
                    };
                    self.supply(val)?;
                }
                StepOutcome::Blocked => {
                    let frame = self.frames.last().ok_or(ExecError::NoFrame)?;
                    return Err(ExecError::Blocked(frame.current));
                }
                StepOutcome::Finished => return Ok(&self.status),
            }
        }
        Err(ExecError::Diverged)
    }

    fn execute(
        &mut self,
        unit: &CompiledUnit,
        world: &mut World,
        procedure: &StepProcedure,
    ) -> Result<(), ExecError> {
        trace!("executing {}", procedure.name);
        for attribute in &procedure.traces {
            world.effects.push(Effect::Attribute(attribute.clone()));
        }
        let mut invoke = false;
        for op in &procedure.body {
            match self.op(unit, world, op)? {
                Flow::Next => {}
                Flow::Invoke => invoke = true,
                Flow::Raise => return self.raise(unit, procedure),
                Flow::Stop => return Ok(()),
            }
        }

        match &procedure.epilogue {
            Epilogue::Goto(edge) => self.take(unit, edge)?,
            Epilogue::Branch {
                cond,
                then,
                otherwise,
            } => {
                let frame = self.frames.last().ok_or(ExecError::NoFrame)?;
                let edge = if eval_bool(cond, frame, world)? {
                    then
                } else {
                    otherwise
                };
                self.take(unit, edge)?;
            }
            Epilogue::Select(edges) => {
                let frame = self.frames.last_mut().ok_or(ExecError::NoFrame)?;
                let clause = frame.selected.take().ok_or(ExecError::NoSelection)?;
                let edge = edges.get(clause).ok_or(ExecError::NotEnabled(clause))?;
                self.take(unit, edge)?;
            }
            Epilogue::Return { atomic_delta } => self.exit(*atomic_delta)?,
            Epilogue::Raise => self.raise(unit, procedure)?,
        }

        if invoke {
            let caller = self.frames.last_mut().ok_or(ExecError::NoFrame)?;
            let callee = caller.pending.take().ok_or(ExecError::NoFrame)?;
            self.frames.push(*callee);
        }
        Ok(())
    }

    fn take(&mut self, unit: &CompiledUnit, edge: &Edge) -> Result<(), ExecError> {
        self.jump(
            unit,
            edge.target,
            edge.atomic_delta,
            edge.middle_of_transition,
            &edge.cleanups,
        )
    }

    fn jump(
        &mut self,
        unit: &CompiledUnit,
        target: BlockSymbol,
        atomic_delta: i32,
        middle_of_transition: bool,
        cleanups: &SmallVec<[usize; 2]>,
    ) -> Result<(), ExecError> {
        let frame = self.frames.last_mut().ok_or(ExecError::NoFrame)?;
        let machine = &unit.machines[frame.machine];
        for &cleanup in cleanups {
            for (local, zero) in &machine.cleanups[cleanup].resets {
                frame.locals[local.index()] = zero.clone();
            }
        }
        self.atomicity += atomic_delta;
        frame.current = target;
        self.middle = middle_of_transition || frame.atomic_base > 0;
        Ok(())
    }

    fn raise(&mut self, unit: &CompiledUnit, procedure: &StepProcedure) -> Result<(), ExecError> {
        let exit = procedure
            .on_exception
            .as_ref()
            .ok_or(ExecError::NoExceptionExit(procedure.symbol))?;
        match exit.target {
            Some(target) => self.jump(
                unit,
                target,
                exit.atomic_delta,
                exit.middle_of_transition,
                &exit.cleanups,
            ),
            None => self.exit(exit.atomic_delta),
        }
    }

    /// Leaves the current method, normally or with its pending exception.
    fn exit(&mut self, atomic_delta: i32) -> Result<(), ExecError> {
        self.atomicity += atomic_delta;
        let frame = self.frames.pop().ok_or(ExecError::NoFrame)?;
        match self.frames.last_mut() {
            Some(caller) => {
                caller.returned = Some(Box::new(frame));
                self.middle = self.atomicity > 0;
            }
            None => {
                self.middle = false;
                self.status = match frame.exception {
                    Some(exception) => Status::Raised(exception),
                    None => Status::Returned {
                        ret: frame.ret,
                        outputs: frame.outputs,
                    },
                };
            }
        }
        Ok(())
    }

    fn op(&mut self, unit: &CompiledUnit, world: &mut World, op: &Op) -> Result<Flow, ExecError> {
        let atomicity = self.atomicity;
        let frame = self.frames.last_mut().ok_or(ExecError::NoFrame)?;
        match op {
            Op::Assign(place, expr) => {
                let val = eval(expr, frame, world)?;
                write(place, frame, world, val)?;
            }
            Op::Send { chan, msg } => {
                let chan = channel(&eval(chan, frame, world)?, world)?;
                let msg = eval(msg, frame, world)?;
                world.channels[chan as usize].push_back(msg.clone());
                world.effects.push(Effect::Send { chan, msg });
            }
            Op::Receive { chan, target, ty } => {
                let chan = channel(&eval(chan, frame, world)?, world)?;
                let queue = &mut world.channels[chan as usize];
                let ready = queue
                    .front()
                    .is_some_and(|msg| ty.as_ref().is_none_or(|ty| unit.types.has_type(msg, ty)));
                let msg = ready
                    .then(|| queue.pop_front())
                    .flatten()
                    .ok_or(ExecError::ChannelNotReady(chan))?;
                write(target, frame, world, msg.clone())?;
                world.effects.push(Effect::Receive { chan, msg });
            }
            Op::Event {
                code,
                value,
                external,
            } => {
                let code = eval(code, frame, world)?;
                let value = eval(value, frame, world)?;
                world.effects.push(Effect::Event {
                    code,
                    value,
                    external: *external,
                });
            }
            Op::Assert { cond, message } => {
                if !eval_bool(cond, frame, world)? {
                    self.status = Status::Failed(
                        message
                            .clone()
                            .unwrap_or_else(|| "assertion failed".to_owned()),
                    );
                    return Ok(Flow::Stop);
                }
            }
            Op::Assume(cond) => {
                if !eval_bool(cond, frame, world)? {
                    self.status = Status::Pruned;
                    return Ok(Flow::Stop);
                }
            }
            Op::Accept(cond) => {
                if eval_bool(cond, frame, world)? {
                    world.effects.push(Effect::Accept);
                }
            }
            Op::Trace { format, args } => {
                let args = args
                    .iter()
                    .map(|arg| eval(arg, frame, world))
                    .collect::<Result<Vec<_>, _>>()?;
                world.effects.push(Effect::Trace(render(format, &args)));
            }
            Op::SetException(exception) => frame.exception = Some(exception.clone()),
            Op::ClearException => frame.exception = None,
            Op::ChooseStart(domain) => {
                let values = domain_values(domain, frame, world)?;
                if values.is_empty() {
                    return Err(ExecError::EmptyDomain);
                }
                self.status = Status::Choosing(values);
            }
            Op::ChooseFinish(target) => {
                let val = frame.choice.take().ok_or(ExecError::NoChoice)?;
                write(target, frame, world, val)?;
            }
            Op::NewFrame { callee } => {
                let idx = unit
                    .machine_index(callee)
                    .ok_or_else(|| ExecError::UnknownMethod(callee.clone()))?;
                frame.pending = Some(Box::new(Frame::new(idx, &unit.machines[idx], atomicity)));
            }
            Op::CopyIn { index, value } => {
                let val = eval(value, frame, world)?;
                let pending = frame.pending.as_mut().ok_or(ExecError::NoFrame)?;
                let slot = pending
                    .inputs
                    .get_mut(*index as usize)
                    .ok_or_else(|| ExecError::BadPlace(format!("inputs[{index}]")))?;
                *slot = val;
            }
            Op::SetReceiver(value) => {
                let val = eval(value, frame, world)?;
                frame.pending.as_mut().ok_or(ExecError::NoFrame)?.receiver = Some(val);
            }
            Op::Invoke => return Ok(Flow::Invoke),
            Op::Schedule => {
                let mut callee = frame.pending.take().ok_or(ExecError::NoFrame)?;
                callee.atomic_base = 0;
                world.spawned.push(Process::from_frame(*callee));
            }
            Op::Rethrow => {
                let returned = frame.returned.as_ref().ok_or(ExecError::NoFrame)?;
                if let Some(exception) = returned.exception.clone() {
                    frame.returned = None;
                    frame.exception = Some(exception);
                    return Ok(Flow::Raise);
                }
            }
            Op::CopyOut { index, target } => {
                let returned = frame.returned.as_ref().ok_or(ExecError::NoFrame)?;
                let val = returned
                    .outputs
                    .get(*index as usize)
                    .cloned()
                    .ok_or_else(|| ExecError::BadPlace(format!("outputs[{index}]")))?;
                write(target, frame, world, val)?;
            }
            Op::CopyReturn(target) => {
                let returned = frame.returned.as_ref().ok_or(ExecError::NoFrame)?;
                let val = returned.ret.clone().ok_or(ExecError::NoReturnValue)?;
                write(target, frame, world, val)?;
            }
            Op::ReleaseFrame => frame.returned = None,
            Op::ForeachInit {
                snapshot,
                cursor,
                set,
            } => {
                let set = eval(set, frame, world)?;
                if !matches!(set, Val::Set(_)) {
                    return Err(ExecError::TypeMismatch("foreach"));
                }
                frame.locals[snapshot.index()] = set;
                frame.locals[cursor.index()] = Val::Int(0);
            }
            Op::ForeachNext {
                var,
                element,
                cursor,
            } => {
                let elem = eval(element, frame, world)?;
                let Val::Int(idx) = frame.locals[cursor.index()] else {
                    return Err(ExecError::TypeMismatch("foreach"));
                };
                frame.locals[var.index()] = elem;
                frame.locals[cursor.index()] = Val::Int(idx + 1);
            }
        }
        Ok(Flow::Next)
    }
}

fn enabled(
    unit: &CompiledUnit,
    world: &World,
    frame: &Frame,
    entry: &RunnableEntry,
) -> Result<Vec<bool>, ExecError> {
    entry
        .clauses
        .iter()
        .map(|guards| {
            for guard in guards {
                let on = match guard {
                    PatternGuard::ChannelReady { chan, ty } => {
                        let chan = channel(&eval(chan, frame, world)?, world)?;
                        world.channels[chan as usize]
                            .front()
                            .is_some_and(|msg| ty.as_ref().is_none_or(|ty| unit.types.has_type(msg, ty)))
                    }
                    PatternGuard::Wait(cond) => eval_bool(cond, frame, world)?,
                    PatternGuard::Always => true,
                };
                if !on {
                    return Ok(false);
                }
            }
            Ok(true)
        })
        .collect()
}

fn channel(val: &Val, world: &World) -> Result<u32, ExecError> {
    match val {
        Val::Chan(Some(chan)) if (*chan as usize) < world.channels.len() => Ok(*chan),
        _ => Err(ExecError::NullChannel),
    }
}

fn domain_values(domain: &ChoiceDomain, frame: &Frame, world: &World) -> Result<Vec<Val>, ExecError> {
    match domain {
        ChoiceDomain::Bool => Ok(vec![Val::Bool(false), Val::Bool(true)]),
        ChoiceDomain::Range(lo, hi) => Ok((*lo..=*hi).map(Val::Int).collect()),
        ChoiceDomain::Enum { variants, .. } => Ok((0..*variants as i64).map(Val::Int).collect()),
        ChoiceDomain::Set(set) => match eval(set, frame, world)? {
            Val::Set(set) => Ok(set.into_iter().collect()),
            _ => Err(ExecError::TypeMismatch("choose")),
        },
    }
}

fn render(format: &str, args: &[Val]) -> String {
    let mut args = args.iter();
    let mut out = String::with_capacity(format.len());
    let mut rest = format;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(&arg.to_string()),
            None => out.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

fn eval_bool(expr: &RExpr, frame: &Frame, world: &World) -> Result<bool, ExecError> {
    match eval(expr, frame, world)? {
        Val::Bool(b) => Ok(b),
        _ => Err(ExecError::TypeMismatch("condition")),
    }
}

fn eval_int(expr: &RExpr, frame: &Frame, world: &World) -> Result<i64, ExecError> {
    match eval(expr, frame, world)? {
        Val::Int(i) => Ok(i),
        _ => Err(ExecError::TypeMismatch("integer operand")),
    }
}

fn eval_set(expr: &RExpr, frame: &Frame, world: &World) -> Result<BTreeSet<Val>, ExecError> {
    match eval(expr, frame, world)? {
        Val::Set(set) => Ok(set),
        _ => Err(ExecError::TypeMismatch("set operand")),
    }
}

fn eval(expr: &RExpr, frame: &Frame, world: &World) -> Result<Val, ExecError> {
    match expr {
        RExpr::Const(val) => Ok(val.clone()),
        RExpr::Read(place) => read(place, frame, world).cloned(),
        RExpr::Unary(UnOp::Not, e) => Ok(Val::Bool(!eval_bool(e, frame, world)?)),
        RExpr::Unary(UnOp::Neg, e) => eval_int(e, frame, world)?
            .checked_neg()
            .map(Val::Int)
            .ok_or(ExecError::Overflow),
        RExpr::Binary(BinOp::And, lhs, rhs) => {
            Ok(Val::Bool(eval_bool(lhs, frame, world)? && eval_bool(rhs, frame, world)?))
        }
        RExpr::Binary(BinOp::Or, lhs, rhs) => {
            Ok(Val::Bool(eval_bool(lhs, frame, world)? || eval_bool(rhs, frame, world)?))
        }
        RExpr::Binary(BinOp::Eq, lhs, rhs) => {
            Ok(Val::Bool(eval(lhs, frame, world)? == eval(rhs, frame, world)?))
        }
        RExpr::Binary(BinOp::Ne, lhs, rhs) => {
            Ok(Val::Bool(eval(lhs, frame, world)? != eval(rhs, frame, world)?))
        }
        RExpr::Binary(op, lhs, rhs) => {
            let lhs = eval_int(lhs, frame, world)?;
            let rhs = eval_int(rhs, frame, world)?;
            arith(*op, lhs, rhs)
        }
        RExpr::SetLit(items) => items
            .iter()
            .map(|item| eval(item, frame, world))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Val::Set),
        RExpr::Contains(elem, set) => {
            let elem = eval(elem, frame, world)?;
            Ok(Val::Bool(eval_set(set, frame, world)?.contains(&elem)))
        }
        RExpr::Size(set) => Ok(Val::Int(eval_set(set, frame, world)?.len() as i64)),
        RExpr::ElementAt(set, idx) => {
            let idx = eval_int(idx, frame, world)?;
            let set = eval_set(set, frame, world)?;
            usize::try_from(idx)
                .ok()
                .and_then(|idx| set.into_iter().nth(idx))
                .ok_or(ExecError::TypeMismatch("set index"))
        }
        RExpr::ExceptionIs(exception) => {
            Ok(Val::Bool(frame.exception.as_ref() == Some(exception)))
        }
    }
}

fn arith(op: BinOp, lhs: i64, rhs: i64) -> Result<Val, ExecError> {
    match op {
        BinOp::Add => lhs.checked_add(rhs).map(Val::Int).ok_or(ExecError::Overflow),
        BinOp::Sub => lhs.checked_sub(rhs).map(Val::Int).ok_or(ExecError::Overflow),
        BinOp::Mul => lhs.checked_mul(rhs).map(Val::Int).ok_or(ExecError::Overflow),
        BinOp::Div if rhs == 0 => Err(ExecError::DivisionByZero),
        BinOp::Div => lhs.checked_div(rhs).map(Val::Int).ok_or(ExecError::Overflow),
        BinOp::Mod if rhs == 0 => Err(ExecError::DivisionByZero),
        BinOp::Mod => lhs.checked_rem(rhs).map(Val::Int).ok_or(ExecError::Overflow),
        BinOp::Lt => Ok(Val::Bool(lhs < rhs)),
        BinOp::Le => Ok(Val::Bool(lhs <= rhs)),
        BinOp::Gt => Ok(Val::Bool(lhs > rhs)),
        BinOp::Ge => Ok(Val::Bool(lhs >= rhs)),
        BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => Err(ExecError::TypeMismatch("integer operator")),
    }
}

fn read<'a>(place: &Place, frame: &'a Frame, world: &'a World) -> Result<&'a Val, ExecError> {
    let base = match place.base {
        PlaceBase::Global(idx) => world.globals.get(idx as usize),
        PlaceBase::Local(local) => frame.locals.get(local.index()),
        PlaceBase::Input(idx) => frame.inputs.get(idx as usize),
        PlaceBase::Output(idx) => frame.outputs.get(idx as usize),
        PlaceBase::ReturnValue => frame.ret.as_ref(),
        PlaceBase::Receiver => frame.receiver.as_ref(),
    }
    .ok_or_else(|| ExecError::BadPlace(place.to_string()))?;
    place.path.iter().try_fold(base, |val, field| match val {
        Val::Struct(fields) => fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, val)| val)
            .ok_or_else(|| ExecError::NoField(field.clone())),
        _ => Err(ExecError::NoField(field.clone())),
    })
}

fn write(place: &Place, frame: &mut Frame, world: &mut World, val: Val) -> Result<(), ExecError> {
    let mut slot = match place.base {
        PlaceBase::Global(idx) => world.globals.get_mut(idx as usize),
        PlaceBase::Local(local) => frame.locals.get_mut(local.index()),
        PlaceBase::Input(idx) => frame.inputs.get_mut(idx as usize),
        PlaceBase::Output(idx) => frame.outputs.get_mut(idx as usize),
        PlaceBase::ReturnValue => frame.ret.as_mut(),
        PlaceBase::Receiver => frame.receiver.as_mut(),
    }
    .ok_or_else(|| ExecError::BadPlace(place.to_string()))?;
    for field in &place.path {
        slot = match slot {
            Val::Struct(fields) => fields
                .iter_mut()
                .find(|(name, _)| name == field)
                .map(|(_, val)| val)
                .ok_or_else(|| ExecError::NoField(field.clone()))?,
            _ => return Err(ExecError::NoField(field.clone())),
        };
    }
    *slot = val;
    Ok(())
}
