//! Statement and expression normalizer.
//!
//! Rewrites the single statement of each block, its branch condition and the join guards
//! into [`Op`]s and [`RExpr`]s over the flat runtime layout.
//! Identifiers resolve, in order, against the scope chain of the block,
//! the inputs, the outputs and the globals of the unit; `this` names the receiver.
//!
//! Method calls become primitive frame operations:
//! the call-start block builds the callee frame, copies the inputs in, records the receiver and invokes it,
//! while the call-finish block rethrows the callee exception or copies outputs and return value back.
//! A choice is split into publishing its domain and binding the picked value.

use crate::block::{BlockStmt, Cond, Transfer};
use crate::error::{LowerError, narrow};
use crate::ir::*;
use crate::program::*;
use crate::scope::{LocalId, ScopeId, ScopeTree};
use crate::splitter::SplitMethod;
use crate::types::{TypeDef, TypeTable};
use hashbrown::HashMap;
use log::debug;

/// Unit-wide name tables the normalizer resolves against.
#[derive(Debug)]
pub struct UnitEnv<'a> {
    pub types: &'a TypeTable,
    globals: HashMap<&'a str, (u16, &'a Type)>,
    methods: HashMap<&'a str, &'a Method>,
}

impl<'a> UnitEnv<'a> {
    pub fn new(unit: &'a CompilationUnit, types: &'a TypeTable) -> Result<Self, LowerError> {
        let mut globals = HashMap::with_capacity(unit.globals.len());
        for (idx, global) in unit.globals.iter().enumerate() {
            types.check(&global.ty)?;
            if globals
                .insert(global.name.as_str(), (narrow(idx, "globals")?, &global.ty))
                .is_some()
            {
                return Err(LowerError::DuplicateSymbol(global.name.clone()));
            }
        }
        let mut methods = HashMap::with_capacity(unit.methods.len());
        for method in &unit.methods {
            if methods.insert(method.name.as_str(), method).is_some() {
                return Err(LowerError::DuplicateSymbol(method.name.clone()));
            }
        }
        Ok(Self {
            types,
            globals,
            methods,
        })
    }

    pub fn method(&self, name: &str, span: Span) -> Result<&'a Method, LowerError> {
        self.methods
            .get(name)
            .copied()
            .ok_or_else(|| LowerError::UnknownMethod(name.to_owned(), span))
    }
}

/// The normalized content of a split method, indexed like its blocks and selects.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub ops: Vec<Vec<Op>>,
    pub conds: Vec<Option<RExpr>>,
    /// Per select, per clause, the guards of its patterns.
    pub guards: Vec<Vec<Vec<PatternGuard>>>,
}

pub fn normalize(
    split: &SplitMethod,
    method: &Method,
    env: &UnitEnv,
) -> Result<Normalized, LowerError> {
    let normalizer = Normalizer {
        env,
        method,
        scopes: &split.scopes,
    };
    let mut ops = Vec::with_capacity(split.blocks.len());
    let mut conds = Vec::with_capacity(split.blocks.len());
    for block in &split.blocks {
        let block_ops = match &block.stmt {
            Some(stmt) => normalizer.stmt(stmt, block.scope, block.span)?,
            None => Vec::new(),
        };
        debug!("{}: {} operations", block.id, block_ops.len());
        ops.push(block_ops);
        conds.push(match &block.transfer {
            Transfer::Branch { cond, .. } => Some(normalizer.cond(cond, block.scope)?),
            _ => None,
        });
    }
    let guards = split
        .selects
        .iter()
        .map(|info| {
            let scope = split.block(info.guard).scope;
            info.clauses
                .iter()
                .map(|patterns| {
                    patterns
                        .iter()
                        .map(|pattern| normalizer.guard(pattern, scope))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Normalized { ops, conds, guards })
}

struct Normalizer<'a> {
    env: &'a UnitEnv<'a>,
    method: &'a Method,
    scopes: &'a ScopeTree,
}

impl Normalizer<'_> {
    fn stmt(&self, stmt: &BlockStmt, scope: ScopeId, span: Span) -> Result<Vec<Op>, LowerError> {
        let ops = match stmt {
            BlockStmt::Assign(lhs, rhs) => {
                vec![Op::Assign(self.place(lhs, scope)?.0, self.expr(rhs, scope)?)]
            }
            BlockStmt::Send { chan, msg } => vec![Op::Send {
                chan: self.expr(chan, scope)?,
                msg: self.expr(msg, scope)?,
            }],
            BlockStmt::Event {
                code,
                value,
                external,
            } => vec![Op::Event {
                code: self.expr(code, scope)?,
                value: self.expr(value, scope)?,
                external: *external,
            }],
            BlockStmt::Assert { cond, message } => vec![Op::Assert {
                cond: self.expr(cond, scope)?,
                message: message.clone(),
            }],
            BlockStmt::Assume(cond) => vec![Op::Assume(self.expr(cond, scope)?)],
            BlockStmt::Accept(cond) => vec![Op::Accept(self.expr(cond, scope)?)],
            BlockStmt::Trace { format, args } => vec![Op::Trace {
                format: format.clone(),
                args: self.exprs(args, scope)?,
            }],
            BlockStmt::Raise(exception) => vec![Op::SetException(exception.clone())],
            BlockStmt::Catch => vec![Op::ClearException],
            BlockStmt::ChooseStart(domain) => vec![Op::ChooseStart(self.domain(domain, scope, span)?)],
            BlockStmt::ChooseFinish(target) => vec![Op::ChooseFinish(self.place(target, scope)?.0)],
            BlockStmt::CallStart(call) => {
                let mut ops = self.call_frame(call, scope, span)?;
                ops.push(Op::Invoke);
                ops
            }
            BlockStmt::CallFinish(call) => self.call_finish(call, scope, span)?,
            BlockStmt::AsyncCall(call) => {
                if call.result.is_some() || !call.outputs.is_empty() {
                    return Err(LowerError::UnsupportedShape(
                        "results of an asynchronous call",
                        span,
                    ));
                }
                let mut ops = self.call_frame(call, scope, span)?;
                ops.push(Op::Schedule);
                ops
            }
            BlockStmt::Patterns(patterns) => {
                let mut ops = Vec::new();
                for pattern in patterns {
                    match pattern {
                        JoinPattern::Receive { chan, target } => {
                            let (target, ty) = self.place(target, scope)?;
                            ops.push(Op::Receive {
                                chan: self.expr(chan, scope)?,
                                target,
                                ty,
                            });
                        }
                        JoinPattern::Event {
                            code,
                            value,
                            external,
                        } => ops.push(Op::Event {
                            code: self.expr(code, scope)?,
                            value: self.expr(value, scope)?,
                            external: *external,
                        }),
                        JoinPattern::Wait(_) | JoinPattern::Timeout => {}
                    }
                }
                ops
            }
            BlockStmt::ForeachInit {
                snapshot,
                cursor,
                set,
            } => vec![Op::ForeachInit {
                snapshot: *snapshot,
                cursor: *cursor,
                set: self.expr(set, scope)?,
            }],
            BlockStmt::ForeachNext {
                var,
                snapshot,
                cursor,
            } => {
                let local = |id: LocalId| Box::new(RExpr::Read(Place::new(PlaceBase::Local(id))));
                vec![Op::ForeachNext {
                    var: *var,
                    element: RExpr::ElementAt(local(*snapshot), local(*cursor)),
                    cursor: *cursor,
                }]
            }
            BlockStmt::Return(value) => {
                if self.method.ret.is_none() {
                    return Err(LowerError::UnsupportedShape(
                        "return value in a method without return type",
                        span,
                    ));
                }
                vec![Op::Assign(
                    Place::new(PlaceBase::ReturnValue),
                    self.expr(value, scope)?,
                )]
            }
        };
        Ok(ops)
    }

    fn call_frame(&self, call: &Call, scope: ScopeId, span: Span) -> Result<Vec<Op>, LowerError> {
        let callee = self.env.method(&call.callee, span)?;
        if callee.params.len() != call.args.len() {
            return Err(LowerError::ArityMismatch {
                callee: call.callee.clone(),
                expected: callee.params.len(),
                found: call.args.len(),
                span,
            });
        }
        let mut ops = Vec::with_capacity(call.args.len() + 3);
        ops.push(Op::NewFrame {
            callee: call.callee.clone(),
        });
        for (index, arg) in call.args.iter().enumerate() {
            ops.push(Op::CopyIn {
                index: narrow(index, "arguments")?,
                value: self.expr(arg, scope)?,
            });
        }
        if let Some(receiver) = &call.receiver {
            ops.push(Op::SetReceiver(self.expr(receiver, scope)?));
        }
        Ok(ops)
    }

    fn call_finish(&self, call: &Call, scope: ScopeId, span: Span) -> Result<Vec<Op>, LowerError> {
        let callee = self.env.method(&call.callee, span)?;
        if !call.outputs.is_empty() && call.outputs.len() != callee.outputs.len() {
            return Err(LowerError::ArityMismatch {
                callee: call.callee.clone(),
                expected: callee.outputs.len(),
                found: call.outputs.len(),
                span,
            });
        }
        let mut ops = vec![Op::Rethrow];
        for (index, output) in call.outputs.iter().enumerate() {
            ops.push(Op::CopyOut {
                index: narrow(index, "outputs")?,
                target: self.place(output, scope)?.0,
            });
        }
        if let Some(result) = &call.result {
            if callee.ret.is_none() {
                return Err(LowerError::UnsupportedShape(
                    "result of a method without return type",
                    span,
                ));
            }
            ops.push(Op::CopyReturn(self.place(result, scope)?.0));
        }
        ops.push(Op::ReleaseFrame);
        Ok(ops)
    }

    fn cond(&self, cond: &Cond, scope: ScopeId) -> Result<RExpr, LowerError> {
        match cond {
            Cond::Expr(expr) => self.expr(expr, scope),
            Cond::ExceptionIs(exception) => Ok(RExpr::ExceptionIs(exception.clone())),
            Cond::HasNext { snapshot, cursor } => Ok(RExpr::Binary(
                BinOp::Lt,
                Box::new(RExpr::Read(Place::new(PlaceBase::Local(*cursor)))),
                Box::new(RExpr::Size(Box::new(RExpr::Read(Place::new(
                    PlaceBase::Local(*snapshot),
                ))))),
            )),
        }
    }

    fn guard(&self, pattern: &JoinPattern, scope: ScopeId) -> Result<PatternGuard, LowerError> {
        match pattern {
            JoinPattern::Receive { chan, target } => Ok(PatternGuard::ChannelReady {
                chan: self.expr(chan, scope)?,
                ty: self.place(target, scope)?.1,
            }),
            JoinPattern::Wait(cond) => Ok(PatternGuard::Wait(self.expr(cond, scope)?)),
            JoinPattern::Timeout | JoinPattern::Event { .. } => Ok(PatternGuard::Always),
        }
    }

    fn domain(
        &self,
        domain: &ChooseDomain,
        scope: ScopeId,
        span: Span,
    ) -> Result<ChoiceDomain, LowerError> {
        match domain {
            ChooseDomain::Bool => Ok(ChoiceDomain::Bool),
            ChooseDomain::Type(name) => match self.env.types.get(name)? {
                TypeDef::Enum(variants) => Ok(ChoiceDomain::Enum {
                    name: name.clone(),
                    variants: variants.len(),
                }),
                TypeDef::Range(lo, hi) => Ok(ChoiceDomain::Range(*lo, *hi)),
                TypeDef::Struct(_) => Err(LowerError::UnsupportedShape(
                    "choice over a struct type",
                    span,
                )),
            },
            ChooseDomain::Set(set) => Ok(ChoiceDomain::Set(self.expr(set, scope)?)),
        }
    }

    fn exprs(&self, exprs: &[Expr], scope: ScopeId) -> Result<Vec<RExpr>, LowerError> {
        exprs.iter().map(|e| self.expr(e, scope)).collect()
    }

    fn expr(&self, expr: &Expr, scope: ScopeId) -> Result<RExpr, LowerError> {
        match &expr.kind {
            ExprKind::Const(val) => Ok(RExpr::Const(val.clone())),
            ExprKind::Ident(_) | ExprKind::Field(..) => Ok(RExpr::Read(self.place(expr, scope)?.0)),
            ExprKind::EnumLit(ty, variant) => {
                Ok(RExpr::Const(Val::Int(self.env.types.enum_ordinal(ty, variant)?)))
            }
            ExprKind::Unary(op, e) => Ok(RExpr::Unary(*op, Box::new(self.expr(e, scope)?))),
            ExprKind::Binary(op, lhs, rhs) => Ok(RExpr::Binary(
                *op,
                Box::new(self.expr(lhs, scope)?),
                Box::new(self.expr(rhs, scope)?),
            )),
            ExprKind::SetLit(items) => Ok(RExpr::SetLit(self.exprs(items, scope)?)),
            ExprKind::In(elem, set) => Ok(RExpr::Contains(
                Box::new(self.expr(elem, scope)?),
                Box::new(self.expr(set, scope)?),
            )),
            ExprKind::Size(set) => Ok(RExpr::Size(Box::new(self.expr(set, scope)?))),
            ExprKind::Choose(_) => Err(LowerError::UnsupportedShape("nested choose", expr.span)),
        }
    }

    /// Resolves an assignable expression, together with its type when it is known.
    fn place(&self, expr: &Expr, scope: ScopeId) -> Result<(Place, Option<Type>), LowerError> {
        match &expr.kind {
            ExprKind::Ident(name) => self.resolve(name, scope, expr.span),
            ExprKind::Field(base, field) => {
                let (mut place, ty) = self.place(base, scope)?;
                let ty = match ty {
                    Some(ty) => Some(
                        self.env
                            .types
                            .field_type(&ty, field)
                            .cloned()
                            .ok_or_else(|| LowerError::UnknownField(field.clone(), expr.span))?,
                    ),
                    // Fields of the receiver are not checked.
                    None => None,
                };
                place.path.push(field.clone());
                Ok((place, ty))
            }
            _ => Err(LowerError::UnsupportedShape("place expression", expr.span)),
        }
    }

    fn resolve(
        &self,
        name: &str,
        scope: ScopeId,
        span: Span,
    ) -> Result<(Place, Option<Type>), LowerError> {
        if let Some(local) = self.scopes.lookup(scope, name) {
            let ty = self.scopes.local(local).ty.clone();
            return Ok((Place::new(PlaceBase::Local(local)), Some(ty)));
        }
        if let Some(idx) = self.method.params.iter().position(|p| p.name == name) {
            let ty = self.method.params[idx].ty.clone();
            let idx = narrow(idx, "parameters")?;
            return Ok((Place::new(PlaceBase::Input(idx)), Some(ty)));
        }
        if let Some(idx) = self.method.outputs.iter().position(|p| p.name == name) {
            let ty = self.method.outputs[idx].ty.clone();
            let idx = narrow(idx, "outputs")?;
            return Ok((Place::new(PlaceBase::Output(idx)), Some(ty)));
        }
        if let Some((idx, ty)) = self.env.globals.get(name) {
            return Ok((Place::new(PlaceBase::Global(*idx)), Some((*ty).clone())));
        }
        if name == "this" {
            return Ok((Place::new(PlaceBase::Receiver), None));
        }
        Err(LowerError::UnknownIdentifier(name.to_owned(), span))
    }
}
