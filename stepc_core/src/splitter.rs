//! Basic block splitter.
//!
//! Cuts the statement tree of a method into [`BasicBlock`]s at every scheduler-visible point:
//! communication and join-guard evaluation, atomic-region entry and exit, yields,
//! call and return boundaries, and choice points.
//!
//! The statement tree is lowered backward:
//! every statement is lowered knowing the block its normal completion continues to,
//! and returns the first block of its own lowering.
//! Forward references (gotos) are the only successors patched after the fact.
//!
//! ```
//! # use stepc_core::program::*;
//! # use stepc_core::session::Session;
//! # use stepc_core::splitter::split;
//! # use stepc_core::types::TypeTable;
//! // atomic { a = 1; b = 2; }
//! let method = Method::new("main", vec![Stmt::atomic(Stmt::seq(vec![
//!     Stmt::assign(Expr::ident("a"), Expr::int(1)),
//!     Stmt::assign(Expr::ident("b"), Expr::int(2)),
//! ]))]);
//! let mut session = Session::default();
//! let split = split(&method, &TypeTable::default(), &mut session).expect("split");
//!
//! let entries = split.blocks.iter().filter(|b| b.is_atomic_entry).collect::<Vec<_>>();
//! assert_eq!(entries.len(), 1);
//! assert_eq!(entries[0].atomic_delta, 1);
//! ```

use crate::block::*;
use crate::error::LowerError;
use crate::program::*;
use crate::scope::{ScopeId, ScopeTree};
use crate::session::Session;
use crate::types::TypeTable;
use hashbrown::{HashMap, HashSet};
use log::{debug, info, trace};

/// Successor of statements that never complete normally.
pub(crate) const NOWHERE: BlockId = BlockId(u32::MAX);

/// The blocks of a method, together with the scope tree created while splitting.
#[derive(Debug, Clone)]
pub struct SplitMethod {
    pub blocks: Vec<BasicBlock>,
    pub scopes: ScopeTree,
    pub selects: Vec<SelectInfo>,
    pub entry: BlockId,
}

impl SplitMethod {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Successors of a block, exception edges included.
    pub fn successors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        let block = self.block(id);
        block
            .transfer
            .successors()
            .into_iter()
            .chain(block.exception.and_then(|edge| edge.handler))
    }
}

/// Lowering context of a statement.
#[derive(Debug, Clone, Copy)]
struct Ctx {
    scope: ScopeId,
    level: u32,
    region: Option<usize>,
    handler: Option<BlockId>,
}

/// Splits a method body into basic blocks.
pub fn split(
    method: &Method,
    types: &TypeTable,
    session: &mut Session,
) -> Result<SplitMethod, LowerError> {
    info!("splitting method {}", method.name);
    let mut splitter = Splitter::new(types, session);
    splitter.lower_method(method)?;
    Ok(splitter.finish())
}

struct Splitter<'a> {
    types: &'a TypeTable,
    session: &'a mut Session,
    blocks: Vec<BasicBlock>,
    block_regions: Vec<Option<usize>>,
    scopes: ScopeTree,
    selects: Vec<SelectInfo>,
    // Atomic regions, indexed by region, pointing to the enclosing one.
    regions: Vec<Option<usize>>,
    // Labels targeted by some lowered goto.
    targets: HashSet<Ident>,
    labels: HashMap<Ident, BlockId>,
    gotos: Vec<(BlockId, Ident, Span)>,
}

impl<'a> Splitter<'a> {
    fn new(types: &'a TypeTable, session: &'a mut Session) -> Self {
        Self {
            types,
            session,
            blocks: Vec::new(),
            block_regions: Vec::new(),
            scopes: ScopeTree::new(),
            selects: Vec::new(),
            regions: Vec::new(),
            targets: HashSet::new(),
            labels: HashMap::new(),
            gotos: Vec::new(),
        }
    }

    fn lower_method(&mut self, method: &Method) -> Result<(), LowerError> {
        let ctx = Ctx {
            scope: ScopeTree::METHOD,
            level: 0,
            region: None,
            handler: None,
        };

        // The entry block always comes first.
        // It has no source range of its own: its context is that of the first statement.
        let entry = self.add_block(ctx, None, Transfer::Unset, Span::default());
        self.blocks[entry.index()].is_entry = true;

        for local in &method.locals {
            self.types.check(&local.ty)?;
            self.scopes
                .new_local(ScopeTree::METHOD, &local.name, local.ty.clone(), local.span)?;
        }

        // Later definitions of a label are lowered as ordinary statements.
        let mut body = method.body.clone();
        let mut defined = HashMap::new();
        for stmt in body.iter_mut() {
            self.strip_duplicate_labels(stmt, &mut defined);
        }
        self.collect_targets(&body);

        let exit = if self.seq_ends(&body) {
            NOWHERE
        } else {
            self.add_block(ctx, None, Transfer::Return, method.span.closing())
        };
        let mut head = self.lower_seq(&body, exit, ctx)?;
        for local in method.locals.iter().rev() {
            if let Some(init) = &local.init {
                head = self.lower_assign(&Expr::ident(&local.name), init, local.span, head, ctx)?;
            }
        }
        self.blocks[entry.index()].transfer = Transfer::Jump(head);

        self.resolve_gotos()?;
        self.prune_unreachable();
        Ok(())
    }

    fn finish(mut self) -> SplitMethod {
        for block in self.blocks.iter_mut() {
            let delta = match (&block.transfer, block.exception) {
                (Transfer::Raise, Some(edge)) => edge.atomic_delta,
                _ => block.atomic_delta,
            };
            let level_after = block.level as i32 + delta;
            // A guard commits to the selected clause without interleaving.
            block.middle_of_transition = block.is_guard() || (!block.is_yield && level_after > 0);
        }
        SplitMethod {
            blocks: self.blocks,
            scopes: self.scopes,
            selects: self.selects,
            entry: BlockId(0),
        }
    }

    fn add_block(
        &mut self,
        ctx: Ctx,
        stmt: Option<BlockStmt>,
        transfer: Transfer,
        span: Span,
    ) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        debug!(
            "{id}: {} (level {}, scope {:?})",
            stmt.as_ref().map_or_else(|| "-".to_owned(), BlockStmt::describe),
            ctx.level,
            ctx.scope
        );
        self.blocks.push(BasicBlock {
            id,
            stmt,
            transfer,
            level: ctx.level,
            atomic_delta: 0,
            middle_of_transition: false,
            is_atomic_entry: false,
            is_entry: false,
            is_yield: false,
            scope: ctx.scope,
            join: None,
            exception: None,
            label: None,
            span,
            attributes: Vec::new(),
        });
        self.block_regions.push(ctx.region);
        id
    }

    fn exception_edge(&self, ctx: Ctx) -> ExceptionEdge {
        match ctx.handler {
            Some(handler) => ExceptionEdge {
                handler: Some(handler),
                atomic_delta: self.blocks[handler.index()].level as i32 - ctx.level as i32,
            },
            None => ExceptionEdge {
                handler: None,
                atomic_delta: -(ctx.level as i32),
            },
        }
    }

    fn lower_seq(&mut self, stmts: &[Stmt], next: BlockId, ctx: Ctx) -> Result<BlockId, LowerError> {
        let live = self.live(stmts);
        if live.len() < stmts.len() {
            debug!("skipping {} unreachable statements", stmts.len() - live.len());
        }
        let mut head = next;
        for stmt in live.into_iter().rev() {
            head = self.lower_stmt(stmt, head, ctx)?;
        }
        Ok(head)
    }

    fn lower_stmt(&mut self, stmt: &Stmt, next: BlockId, ctx: Ctx) -> Result<BlockId, LowerError> {
        let span = stmt.span;
        let head = match &stmt.kind {
            StmtKind::Skip => next,
            StmtKind::Block(block) => self.lower_block(block, next, ctx)?,
            StmtKind::Assign(lhs, rhs) => self.lower_assign(lhs, rhs, span, next, ctx)?,
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let then = self.lower_stmt(then, next, ctx)?;
                let otherwise = match otherwise {
                    Some(otherwise) => self.lower_stmt(otherwise, next, ctx)?,
                    None => next,
                };
                let cond = Cond::Expr(cond.clone());
                self.add_block(
                    ctx,
                    None,
                    Transfer::Branch {
                        cond,
                        then,
                        otherwise,
                    },
                    span,
                )
            }
            StmtKind::While { cond, body } => {
                let test = self.add_block(ctx, None, Transfer::Unset, span);
                let body = self.lower_stmt(body, test, ctx)?;
                self.blocks[test.index()].transfer = Transfer::Branch {
                    cond: Cond::Expr(cond.clone()),
                    then: body,
                    otherwise: next,
                };
                test
            }
            StmtKind::Foreach { var, set, body } => self.lower_foreach(var, set, body, span, next, ctx)?,
            StmtKind::Try { body, handlers } => self.lower_try(body, handlers, span, next, ctx)?,
            StmtKind::Raise(exception) => {
                let raise = self.add_block(
                    ctx,
                    Some(BlockStmt::Raise(exception.clone())),
                    Transfer::Raise,
                    span,
                );
                self.blocks[raise.index()].exception = Some(self.exception_edge(ctx));
                raise
            }
            StmtKind::Goto(label) => {
                let goto = self.add_block(ctx, None, Transfer::Unset, span);
                self.gotos.push((goto, label.clone(), span));
                goto
            }
            StmtKind::Labeled(label, inner) => {
                let head = self.lower_stmt(inner, next, ctx)?;
                let block = self.add_block(ctx, None, Transfer::Jump(head), span);
                self.blocks[block.index()].label = Some(label.clone());
                self.labels.insert(label.clone(), block);
                block
            }
            StmtKind::Send { chan, msg } => self.add_block(
                ctx,
                Some(BlockStmt::Send {
                    chan: chan.clone(),
                    msg: msg.clone(),
                }),
                Transfer::Jump(next),
                span,
            ),
            StmtKind::Receive { chan, target } => {
                let select = Select {
                    end: false,
                    clauses: vec![JoinClause {
                        patterns: vec![JoinPattern::Receive {
                            chan: chan.clone(),
                            target: target.clone(),
                        }],
                        body: Box::new(Stmt::skip()),
                        span,
                    }],
                };
                self.lower_select(&select, span, next, ctx)?
            }
            StmtKind::Event {
                code,
                value,
                external,
            } => self.add_block(
                ctx,
                Some(BlockStmt::Event {
                    code: code.clone(),
                    value: value.clone(),
                    external: *external,
                }),
                Transfer::Jump(next),
                span,
            ),
            StmtKind::Select(select) if select.clauses.is_empty() => {
                self.session
                    .warn("select without join clauses is ignored".to_owned(), span);
                next
            }
            StmtKind::Select(select) => self.lower_select(select, span, next, ctx)?,
            StmtKind::Atomic(body) => self.lower_atomic(body, span, next, ctx)?,
            StmtKind::Yield => {
                let block = self.add_block(ctx, None, Transfer::Jump(next), span);
                self.blocks[block.index()].is_yield = true;
                block
            }
            StmtKind::Call(call) => {
                let finish = self.add_block(
                    ctx,
                    Some(BlockStmt::CallFinish(call.clone())),
                    Transfer::Jump(next),
                    span,
                );
                self.blocks[finish.index()].exception = Some(self.exception_edge(ctx));
                self.add_block(
                    ctx,
                    Some(BlockStmt::CallStart(call.clone())),
                    Transfer::Jump(finish),
                    span,
                )
            }
            StmtKind::AsyncCall(call) => self.add_block(
                ctx,
                Some(BlockStmt::AsyncCall(call.clone())),
                Transfer::Jump(next),
                span,
            ),
            StmtKind::Assert { cond, message } => self.add_block(
                ctx,
                Some(BlockStmt::Assert {
                    cond: cond.clone(),
                    message: message.clone(),
                }),
                Transfer::Jump(next),
                span,
            ),
            StmtKind::Assume(cond) => self.add_block(
                ctx,
                Some(BlockStmt::Assume(cond.clone())),
                Transfer::Jump(next),
                span,
            ),
            StmtKind::Accept(cond) => self.add_block(
                ctx,
                Some(BlockStmt::Accept(cond.clone())),
                Transfer::Jump(next),
                span,
            ),
            StmtKind::Trace { format, args } => self.add_block(
                ctx,
                Some(BlockStmt::Trace {
                    format: format.clone(),
                    args: args.clone(),
                }),
                Transfer::Jump(next),
                span,
            ),
            StmtKind::Return(value) => {
                let ret = self.add_block(
                    ctx,
                    value.clone().map(BlockStmt::Return),
                    Transfer::Return,
                    span,
                );
                self.blocks[ret.index()].atomic_delta = -(ctx.level as i32);
                ret
            }
        };

        let attributes = self.attributes(stmt);
        if attributes.is_empty() {
            return Ok(head);
        }
        let head = if head == next {
            self.add_block(ctx, None, Transfer::Jump(next), span)
        } else {
            head
        };
        self.blocks[head.index()].attributes.extend(attributes);
        Ok(head)
    }

    fn attributes(&mut self, stmt: &Stmt) -> Vec<Attribute> {
        let mut attributes = Vec::with_capacity(stmt.attributes.len());
        for attribute in &stmt.attributes {
            if attribute.name.trim().is_empty() {
                self.session
                    .warn("attribute without a name is ignored".to_owned(), stmt.span);
            } else {
                attributes.push(attribute.clone());
            }
        }
        attributes
    }

    fn lower_block(&mut self, block: &Block, next: BlockId, ctx: Ctx) -> Result<BlockId, LowerError> {
        if block.locals.is_empty() {
            return self.lower_seq(&block.stmts, next, ctx);
        }
        let scope = self.scopes.new_scope(ctx.scope)?;
        for local in &block.locals {
            self.types.check(&local.ty)?;
            self.scopes
                .new_local(scope, &local.name, local.ty.clone(), local.span)?;
        }
        let inner = Ctx { scope, ..ctx };
        let mut head = self.lower_seq(&block.stmts, next, inner)?;
        for local in block.locals.iter().rev() {
            if let Some(init) = &local.init {
                head = self.lower_assign(&Expr::ident(&local.name), init, local.span, head, inner)?;
            }
        }
        Ok(head)
    }

    fn lower_assign(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        span: Span,
        next: BlockId,
        ctx: Ctx,
    ) -> Result<BlockId, LowerError> {
        if let ExprKind::Choose(domain) = &rhs.kind {
            // Both halves live in the same scope: nothing is reset in between.
            let finish = self.add_block(
                ctx,
                Some(BlockStmt::ChooseFinish(lhs.clone())),
                Transfer::Jump(next),
                span,
            );
            Ok(self.add_block(
                ctx,
                Some(BlockStmt::ChooseStart(domain.clone())),
                Transfer::Jump(finish),
                span,
            ))
        } else {
            Ok(self.add_block(
                ctx,
                Some(BlockStmt::Assign(lhs.clone(), rhs.clone())),
                Transfer::Jump(next),
                span,
            ))
        }
    }

    fn lower_foreach(
        &mut self,
        var: &LocalDecl,
        set: &Expr,
        body: &Stmt,
        span: Span,
        next: BlockId,
        ctx: Ctx,
    ) -> Result<BlockId, LowerError> {
        self.types.check(&var.ty)?;
        let scope = self.scopes.new_scope(ctx.scope)?;
        let snapshot = self.scopes.new_local(
            scope,
            "foreach$set",
            Type::Set(Box::new(var.ty.clone())),
            span,
        )?;
        let cursor = self.scopes.new_local(scope, "foreach$cursor", Type::Int, span)?;
        let bound = self
            .scopes
            .new_local(scope, &var.name, var.ty.clone(), var.span)?;
        let inner = Ctx { scope, ..ctx };

        let test = self.add_block(inner, None, Transfer::Unset, span);
        let body = self.lower_stmt(body, test, inner)?;
        let bind = self.add_block(
            inner,
            Some(BlockStmt::ForeachNext {
                var: bound,
                snapshot,
                cursor,
            }),
            Transfer::Jump(body),
            span,
        );
        self.blocks[test.index()].transfer = Transfer::Branch {
            cond: Cond::HasNext { snapshot, cursor },
            then: bind,
            otherwise: next,
        };
        // The set is evaluated in the enclosing scope, where the bound variable is not visible.
        Ok(self.add_block(
            ctx,
            Some(BlockStmt::ForeachInit {
                snapshot,
                cursor,
                set: set.clone(),
            }),
            Transfer::Jump(test),
            span,
        ))
    }

    fn lower_try(
        &mut self,
        body: &Stmt,
        handlers: &[Handler],
        span: Span,
        next: BlockId,
        ctx: Ctx,
    ) -> Result<BlockId, LowerError> {
        let (handlers, dropped) = effective_handlers(handlers);
        for (message, span) in dropped {
            self.session.warn(message, span);
        }
        if handlers.is_empty() || !self.can_raise(body) {
            return self.lower_stmt(body, next, ctx);
        }

        // Handlers run in the enclosing context.
        let default = handlers.iter().find(|h| h.exception.is_none());
        let mut dispatch = match default {
            Some(default) => {
                let head = self.lower_stmt(&default.body, next, ctx)?;
                self.add_block(ctx, Some(BlockStmt::Catch), Transfer::Jump(head), default.span)
            }
            None => {
                let reraise = self.add_block(ctx, None, Transfer::Raise, span);
                self.blocks[reraise.index()].exception = Some(self.exception_edge(ctx));
                reraise
            }
        };
        for (handler, exception) in handlers
            .iter()
            .rev()
            .filter_map(|h| h.exception.as_ref().map(|e| (h, e)))
        {
            let head = self.lower_stmt(&handler.body, next, ctx)?;
            let catch = self.add_block(ctx, Some(BlockStmt::Catch), Transfer::Jump(head), handler.span);
            dispatch = self.add_block(
                ctx,
                None,
                Transfer::Branch {
                    cond: Cond::ExceptionIs(exception.clone()),
                    then: catch,
                    otherwise: dispatch,
                },
                handler.span,
            );
        }

        let inner = Ctx {
            handler: Some(dispatch),
            ..ctx
        };
        self.lower_stmt(body, next, inner)
    }

    fn lower_select(
        &mut self,
        select: &Select,
        span: Span,
        next: BlockId,
        ctx: Ctx,
    ) -> Result<BlockId, LowerError> {
        // Reserve the index before nested selects in clause bodies take theirs.
        let index = self.selects.len();
        self.selects.push(SelectInfo {
            guard: NOWHERE,
            end: select.end,
            clauses: select
                .clauses
                .iter()
                .map(|clause| clause.patterns.clone())
                .collect(),
            pattern_blocks: Vec::new(),
        });

        let mut arms = Vec::with_capacity(select.clauses.len());
        for (idx, clause) in select.clauses.iter().enumerate() {
            let body = self.lower_stmt(&clause.body, next, ctx)?;
            let patterns = self.add_block(
                ctx,
                Some(BlockStmt::Patterns(clause.patterns.clone())),
                Transfer::Jump(body),
                clause.span,
            );
            self.blocks[patterns.index()].join = Some(JoinRef {
                select: index,
                clause: Some(idx),
            });
            arms.push(patterns);
        }
        let guard = self.add_block(ctx, None, Transfer::Select(arms.clone()), span);
        self.blocks[guard.index()].join = Some(JoinRef {
            select: index,
            clause: None,
        });

        let info = &mut self.selects[index];
        info.guard = guard;
        info.pattern_blocks = arms;
        Ok(guard)
    }

    fn lower_atomic(
        &mut self,
        body: &Stmt,
        span: Span,
        next: BlockId,
        ctx: Ctx,
    ) -> Result<BlockId, LowerError> {
        let region = self.regions.len();
        self.regions.push(ctx.region);
        let inner = Ctx {
            level: ctx.level + 1,
            region: Some(region),
            ..ctx
        };
        let exit = if self.ends_unconditionally(body) {
            NOWHERE
        } else {
            let exit = self.add_block(inner, None, Transfer::Jump(next), span.closing());
            self.blocks[exit.index()].atomic_delta = -1;
            exit
        };
        let body = self.lower_stmt(body, exit, inner)?;
        let entry = self.add_block(ctx, None, Transfer::Jump(body), span);
        let block = &mut self.blocks[entry.index()];
        block.atomic_delta = 1;
        // Only the outermost region entry is an interleaving point.
        block.is_atomic_entry = ctx.level == 0;
        Ok(entry)
    }

    fn resolve_gotos(&mut self) -> Result<(), LowerError> {
        for (goto, label, span) in std::mem::take(&mut self.gotos) {
            let target = *self
                .labels
                .get(&label)
                .ok_or_else(|| LowerError::UnknownLabel(label.clone(), span))?;
            if !self.region_encloses(
                self.block_regions[target.index()],
                self.block_regions[goto.index()],
            ) {
                return Err(LowerError::GotoIntoAtomic(label, span));
            }
            let delta =
                self.blocks[target.index()].level as i32 - self.blocks[goto.index()].level as i32;
            trace!("goto {label}: {goto} -> {target} (atomic delta {delta})");
            let block = &mut self.blocks[goto.index()];
            block.transfer = Transfer::Jump(target);
            block.atomic_delta = delta;
        }
        Ok(())
    }

    fn region_encloses(&self, outer: Option<usize>, inner: Option<usize>) -> bool {
        let mut current = inner;
        loop {
            if current == outer {
                return true;
            }
            match current {
                Some(region) => current = self.regions[region],
                None => return false,
            }
        }
    }

    /// Drops the blocks that no path from the entry reaches, and renumbers the others.
    ///
    /// Unreachable statements are lowered when a goto target is nested inside them:
    /// their own head block, and the arms only their head leads to, are left over.
    fn prune_unreachable(&mut self) {
        let mut reached = vec![false; self.blocks.len()];
        let mut stack = vec![BlockId(0)];
        while let Some(id) = stack.pop() {
            match reached.get_mut(id.index()) {
                Some(seen) if !*seen => *seen = true,
                _ => continue,
            }
            let block = &self.blocks[id.index()];
            stack.extend(block.transfer.successors());
            stack.extend(block.exception.and_then(|edge| edge.handler));
        }
        if reached.iter().all(|&seen| seen) {
            return;
        }

        let mut renumbered = vec![NOWHERE; self.blocks.len()];
        let mut count = 0;
        for (idx, _) in reached.iter().enumerate().filter(|(_, seen)| **seen) {
            renumbered[idx] = BlockId(count);
            count += 1;
        }
        let renumber = |id: BlockId| renumbered.get(id.index()).copied().unwrap_or(NOWHERE);
        debug!("pruning {} unreachable blocks", self.blocks.len() - count as usize);

        let mut kept_selects = vec![None; self.selects.len()];
        let mut selects = Vec::with_capacity(self.selects.len());
        for (idx, mut info) in std::mem::take(&mut self.selects).into_iter().enumerate() {
            if reached[info.guard.index()] {
                kept_selects[idx] = Some(selects.len());
                info.guard = renumber(info.guard);
                info.pattern_blocks = info.pattern_blocks.into_iter().map(renumber).collect();
                selects.push(info);
            }
        }
        self.selects = selects;

        let blocks = std::mem::take(&mut self.blocks);
        let regions = std::mem::take(&mut self.block_regions);
        for ((mut block, region), _) in blocks
            .into_iter()
            .zip(regions)
            .zip(&reached)
            .filter(|(_, seen)| **seen)
        {
            block.id = renumber(block.id);
            block.transfer.retarget(renumber);
            if let Some(edge) = block.exception.as_mut() {
                edge.handler = edge.handler.map(renumber);
            }
            // Pattern blocks are only reached from their guard: a reached join is kept.
            block.join = block.join.and_then(|join| {
                kept_selects[join.select].map(|select| JoinRef { select, ..join })
            });
            self.blocks.push(block);
            self.block_regions.push(region);
        }
        for target in self.labels.values_mut() {
            *target = renumber(*target);
        }
    }

    /// Labels targeted by the gotos of the statements that get lowered.
    ///
    /// Lowering more statements never removes a goto, so the set grows to a fixpoint.
    fn collect_targets(&mut self, body: &[Stmt]) {
        loop {
            let mut gotos = HashSet::new();
            for stmt in self.live(body) {
                self.collect_gotos(stmt, &mut gotos);
            }
            if gotos.len() == self.targets.len() {
                return;
            }
            trace!("goto targets: {gotos:?}");
            self.targets = gotos;
        }
    }

    fn collect_gotos(&self, stmt: &Stmt, gotos: &mut HashSet<Ident>) {
        match &stmt.kind {
            StmtKind::Goto(label) => {
                gotos.insert(label.clone());
            }
            StmtKind::Block(block) => {
                for stmt in self.live(&block.stmts) {
                    self.collect_gotos(stmt, gotos);
                }
            }
            _ => {
                for child in children(stmt) {
                    self.collect_gotos(child, gotos);
                }
            }
        }
    }

    /// Reports every definition of a label but the first, in source order,
    /// and turns it into the plain statement it labels.
    fn strip_duplicate_labels(&mut self, stmt: &mut Stmt, defined: &mut HashMap<Ident, Span>) {
        let duplicate = match &stmt.kind {
            StmtKind::Labeled(label, _) => match defined.get(label).copied() {
                Some(first) => Some(format!(
                    "label {label} is already defined at {}, this definition is ignored",
                    self.session.render(first)
                )),
                None => {
                    defined.insert(label.clone(), stmt.span);
                    None
                }
            },
            _ => None,
        };
        if let Some(message) = duplicate {
            self.session.warn(message, stmt.span);
            if let StmtKind::Labeled(_, inner) = std::mem::replace(&mut stmt.kind, StmtKind::Skip) {
                stmt.kind = StmtKind::Block(Block {
                    locals: Vec::new(),
                    stmts: vec![*inner],
                });
            }
        }
        for child in children_mut(stmt) {
            self.strip_duplicate_labels(child, defined);
        }
    }

    /// Whether a goto can enter the statement through a label nested inside it.
    fn contains_target(&self, stmt: &Stmt) -> bool {
        matches!(&stmt.kind, StmtKind::Labeled(label, _) if self.targets.contains(label))
            || children(stmt).into_iter().any(|c| self.contains_target(c))
    }

    /// Statements of a sequence that get lowered: those that can be reached from its start,
    /// and the unreachable ones with a goto target nested inside.
    fn live<'s>(&self, stmts: &'s [Stmt]) -> Vec<&'s Stmt> {
        let mut live = Vec::with_capacity(stmts.len());
        let mut dead = false;
        for stmt in stmts {
            if dead && !self.contains_target(stmt) {
                continue;
            }
            dead = self.ends_unconditionally(stmt);
            live.push(stmt);
        }
        live
    }

    fn seq_ends(&self, stmts: &[Stmt]) -> bool {
        let mut dead = false;
        for stmt in stmts {
            if dead && !self.contains_target(stmt) {
                continue;
            }
            dead = self.ends_unconditionally(stmt);
        }
        dead
    }

    /// Whether the statement never completes normally.
    fn ends_unconditionally(&self, stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Return(_) | StmtKind::Raise(_) | StmtKind::Goto(_) => true,
            StmtKind::Block(block) => self.seq_ends(&block.stmts),
            StmtKind::If {
                then,
                otherwise: Some(otherwise),
                ..
            } => self.ends_unconditionally(then) && self.ends_unconditionally(otherwise),
            StmtKind::Try { body, handlers } => {
                let (handlers, _) = effective_handlers(handlers);
                self.ends_unconditionally(body)
                    && (handlers.is_empty()
                        || !self.can_raise(body)
                        || handlers.iter().all(|h| self.ends_unconditionally(&h.body)))
            }
            StmtKind::Select(select) => {
                !select.clauses.is_empty()
                    && select
                        .clauses
                        .iter()
                        .all(|clause| self.ends_unconditionally(&clause.body))
            }
            StmtKind::Atomic(body) | StmtKind::Labeled(_, body) => self.ends_unconditionally(body),
            _ => false,
        }
    }

    /// Whether an exception can escape the statement.
    fn can_raise(&self, stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Raise(_) | StmtKind::Call(_) => true,
            StmtKind::Try { body, handlers } => {
                let (handlers, _) = effective_handlers(handlers);
                self.can_raise(body)
                    && (handlers.iter().all(|h| h.exception.is_some())
                        || handlers.iter().any(|h| self.can_raise(&h.body)))
            }
            _ => children(stmt).into_iter().any(|s| self.can_raise(s)),
        }
    }
}

/// Handlers of a `try` that take part in dispatch, in order, with the default one last;
/// and the messages explaining why the others are ignored.
fn effective_handlers(handlers: &[Handler]) -> (Vec<&Handler>, Vec<(String, Span)>) {
    let mut kept = Vec::with_capacity(handlers.len());
    let mut dropped = Vec::new();
    let mut caught = HashSet::new();
    let mut default = false;
    for handler in handlers {
        match &handler.exception {
            None if default => dropped.push((
                "duplicate default handler is ignored".to_owned(),
                handler.span,
            )),
            Some(exception) if default => dropped.push((
                format!("handler for {exception} follows the default handler and is ignored"),
                handler.span,
            )),
            None => {
                default = true;
                kept.push(handler);
            }
            Some(exception) if !caught.insert(exception) => dropped.push((
                format!("duplicate handler for {exception} is ignored"),
                handler.span,
            )),
            Some(_) => kept.push(handler),
        }
    }
    (kept, dropped)
}

/// Direct sub-statements of a statement.
fn children(stmt: &Stmt) -> Vec<&Stmt> {
    match &stmt.kind {
        StmtKind::Block(block) => block.stmts.iter().collect(),
        StmtKind::If {
            then, otherwise, ..
        } => std::iter::once(then.as_ref())
            .chain(otherwise.as_deref())
            .collect(),
        StmtKind::While { body, .. }
        | StmtKind::Foreach { body, .. }
        | StmtKind::Atomic(body)
        | StmtKind::Labeled(_, body) => vec![body.as_ref()],
        StmtKind::Try { body, handlers } => std::iter::once(body.as_ref())
            .chain(handlers.iter().map(|h| &h.body))
            .collect(),
        StmtKind::Select(select) => select.clauses.iter().map(|c| c.body.as_ref()).collect(),
        _ => Vec::new(),
    }
}

fn children_mut(stmt: &mut Stmt) -> Vec<&mut Stmt> {
    match &mut stmt.kind {
        StmtKind::Block(block) => block.stmts.iter_mut().collect(),
        StmtKind::If {
            then, otherwise, ..
        } => std::iter::once(then.as_mut())
            .chain(otherwise.as_deref_mut())
            .collect(),
        StmtKind::While { body, .. }
        | StmtKind::Foreach { body, .. }
        | StmtKind::Atomic(body)
        | StmtKind::Labeled(_, body) => vec![body.as_mut()],
        StmtKind::Try { body, handlers } => std::iter::once(body.as_mut())
            .chain(handlers.iter_mut().map(|h| &mut h.body))
            .collect(),
        StmtKind::Select(select) => select.clauses.iter_mut().map(|c| c.body.as_mut()).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Severity;

    fn split_body(body: Vec<Stmt>) -> Result<(SplitMethod, Session), LowerError> {
        let method = Method::new("test", body);
        let mut session = Session::default();
        let split = split(&method, &TypeTable::default(), &mut session)?;
        Ok((split, session))
    }

    fn assign(var: &str, val: Integer) -> Stmt {
        Stmt::assign(Expr::ident(var), Expr::int(val))
    }

    #[test]
    fn entry_and_implicit_return() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![assign("x", 1)])?;
        let entry = split.block(split.entry);
        assert!(entry.is_entry);
        assert_eq!(split.entry, BlockId(0));
        assert_eq!(split.blocks.len(), 3);
        assert_eq!(split.blocks.iter().filter(|b| b.is_return()).count(), 1);
        Ok(())
    }

    #[test]
    fn no_implicit_return_after_return() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![assign("x", 1), Stmt::ret(None), assign("x", 2)])?;
        // Entry, assignment and explicit return: the dead assignment is skipped.
        assert_eq!(split.blocks.len(), 3);
        Ok(())
    }

    #[test]
    fn while_loops_back() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![Stmt::while_loop(
            Expr::bool(true),
            assign("x", 1),
        )])?;
        let test = split
            .blocks
            .iter()
            .find(|b| matches!(b.transfer, Transfer::Branch { .. }))
            .expect("loop test");
        let Transfer::Branch { then, .. } = test.transfer else {
            unreachable!()
        };
        assert_eq!(split.block(then).transfer, Transfer::Jump(test.id));
        Ok(())
    }

    #[test]
    fn atomic_region_metadata() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![Stmt::atomic(Stmt::seq(vec![
            assign("a", 1),
            assign("b", 2),
        ]))])?;
        let entry = split.blocks.iter().find(|b| b.is_atomic_entry).expect("entry");
        assert_eq!(entry.atomic_delta, 1);
        assert!(entry.middle_of_transition);
        let inner = split
            .blocks
            .iter()
            .filter(|b| b.stmt.is_some())
            .collect::<Vec<_>>();
        assert_eq!(inner.len(), 2);
        assert!(inner.iter().all(|b| b.level == 1 && b.middle_of_transition));
        let exit = split
            .blocks
            .iter()
            .find(|b| b.atomic_delta == -1)
            .expect("exit");
        assert!(!exit.middle_of_transition);
        Ok(())
    }

    #[test]
    fn nested_atomic_entry_is_not_marked() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![Stmt::atomic(Stmt::atomic(assign("a", 1)))])?;
        let plus = split.blocks.iter().filter(|b| b.atomic_delta == 1).count();
        let entries = split.blocks.iter().filter(|b| b.is_atomic_entry).count();
        assert_eq!(plus, 2);
        assert_eq!(entries, 1);
        Ok(())
    }

    #[test]
    fn return_inside_atomic_compensates() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![Stmt::atomic(Stmt::seq(vec![
            assign("a", 1),
            Stmt::ret(None),
        ]))])?;
        let ret = split.blocks.iter().find(|b| b.is_return()).expect("return");
        assert_eq!(ret.level, 1);
        assert_eq!(ret.atomic_delta, -1);
        // No exit block is created for a region that never completes.
        assert!(split.blocks.iter().all(|b| b.atomic_delta != -1 || b.is_return()));
        Ok(())
    }

    #[test]
    fn goto_into_atomic_is_rejected() {
        let result = split_body(vec![
            Stmt::goto("inside"),
            Stmt::labeled("outside", Stmt::skip()),
            Stmt::atomic(Stmt::labeled("inside", assign("a", 1))),
            Stmt::goto("outside"),
        ]);
        assert!(matches!(result, Err(LowerError::GotoIntoAtomic(label, _)) if label == "inside"));
    }

    #[test]
    fn goto_out_of_atomic_compensates() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![
            Stmt::labeled("top", assign("a", 1)),
            Stmt::atomic(Stmt::goto("top")),
        ])?;
        let goto = split
            .blocks
            .iter()
            .find(|b| b.level == 1 && b.atomic_delta == -1 && b.stmt.is_none())
            .expect("goto block");
        assert!(matches!(goto.transfer, Transfer::Jump(_)));
        Ok(())
    }

    #[test]
    fn unknown_label() {
        let result = split_body(vec![Stmt::goto("nowhere")]);
        assert!(matches!(result, Err(LowerError::UnknownLabel(..))));
    }

    #[test]
    fn dead_code_until_target_label() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![
            Stmt::goto("l"),
            assign("dead", 1),
            Stmt::labeled("l", assign("x", 1)),
        ])?;
        assert!(split.blocks.iter().all(|b| match &b.stmt {
            Some(BlockStmt::Assign(lhs, _)) => lhs != &Expr::ident("dead"),
            _ => true,
        }));
        Ok(())
    }

    #[test]
    fn label_targeted_only_from_dead_code() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![
            Stmt::ret(None),
            Stmt::goto("l"),
            Stmt::labeled("l", assign("x", 1)),
        ])?;
        // Entry and return: neither the goto nor the label is lowered.
        assert_eq!(split.blocks.len(), 2);
        assert!(split.blocks.iter().all(|b| b.label.is_none()));
        crate::check::check_split(&split)
    }

    #[test]
    fn target_nested_in_dead_statement() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![
            Stmt::if_else(Expr::ident("c"), Stmt::goto("l"), None),
            Stmt::ret(None),
            Stmt::if_else(
                Expr::ident("d"),
                Stmt::seq(vec![Stmt::labeled("l", assign("x", 1))]),
                None,
            ),
        ])?;
        crate::check::check_split(&split)?;
        let label = split
            .blocks
            .iter()
            .find(|b| b.label.as_deref() == Some("l"))
            .expect("label block");
        let Transfer::Jump(assign) = label.transfer else {
            panic!("label block jumps to its statement");
        };
        // The assignment completes to the implicit return.
        let Transfer::Jump(exit) = split.block(assign).transfer else {
            panic!("assignment jumps to its successor");
        };
        assert!(split.block(exit).is_return());
        // The test of the dead if is never reached and is dropped.
        assert!(split.blocks.iter().all(|b| !matches!(
            &b.transfer,
            Transfer::Branch { cond: Cond::Expr(cond), .. } if cond == &Expr::ident("d")
        )));
        assert!(split.blocks.iter().enumerate().all(|(idx, b)| b.id.index() == idx));
        Ok(())
    }

    #[test]
    fn dead_select_around_target_is_dropped() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![
            Stmt::goto("l"),
            Stmt::receive(Expr::ident("ch"), Expr::ident("x")),
            Stmt::select(
                false,
                vec![(
                    vec![JoinPattern::Timeout],
                    Stmt::labeled("l", assign("x", 1)),
                )],
            ),
        ])?;
        crate::check::check_split(&split)?;
        assert!(split.selects.is_empty());
        assert!(split.blocks.iter().all(|b| b.join.is_none()));
        Ok(())
    }

    #[test]
    fn duplicate_label_is_reported() -> Result<(), LowerError> {
        let (split, session) = split_body(vec![
            Stmt::labeled("l", assign("x", 1)),
            Stmt::labeled("l", assign("x", 2)),
            Stmt::if_else(Expr::ident("c"), Stmt::goto("l"), None),
        ])?;
        assert_eq!(session.diagnostics().len(), 1);
        assert_eq!(session.diagnostics()[0].severity, Severity::Warning);
        assert_eq!(split.blocks.iter().filter(|b| b.label.is_some()).count(), 1);
        Ok(())
    }

    #[test]
    fn try_without_raise_has_no_handlers() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![Stmt::try_with(
            assign("x", 1),
            vec![(Some("E"), assign("x", 2))],
        )])?;
        assert!(split.blocks.iter().all(|b| b.stmt != Some(BlockStmt::Catch)));
        Ok(())
    }

    #[test]
    fn try_dispatch_chain() -> Result<(), LowerError> {
        let (split, session) = split_body(vec![Stmt::try_with(
            Stmt::raise("E"),
            vec![
                (Some("E"), assign("x", 1)),
                (Some("E"), assign("x", 2)),
                (None, assign("x", 3)),
                (None, assign("x", 4)),
            ],
        )])?;
        assert_eq!(session.diagnostics().len(), 2);
        let catches = split
            .blocks
            .iter()
            .filter(|b| b.stmt == Some(BlockStmt::Catch))
            .count();
        assert_eq!(catches, 2);
        let raise = split
            .blocks
            .iter()
            .find(|b| matches!(b.stmt, Some(BlockStmt::Raise(_))))
            .expect("raise");
        let handler = raise.exception.and_then(|e| e.handler).expect("handler");
        assert!(matches!(
            &split.block(handler).transfer,
            Transfer::Branch { cond: Cond::ExceptionIs(e), .. } if e == "E"
        ));
        Ok(())
    }

    #[test]
    fn unmatched_exception_is_reraised() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![Stmt::try_with(
            Stmt::raise("E"),
            vec![(Some("F"), Stmt::skip())],
        )])?;
        let reraise = split
            .blocks
            .iter()
            .find(|b| b.stmt.is_none() && b.transfer == Transfer::Raise)
            .expect("reraise");
        assert_eq!(reraise.exception.map(|e| e.handler), Some(None));
        Ok(())
    }

    #[test]
    fn empty_select_is_dropped() -> Result<(), LowerError> {
        let (split, session) = split_body(vec![Stmt::select(false, Vec::new())])?;
        assert_eq!(session.diagnostics().len(), 1);
        assert!(split.selects.is_empty());
        Ok(())
    }

    #[test]
    fn select_guard_and_patterns() -> Result<(), LowerError> {
        let (split, _) = split_body(vec![Stmt::select(
            true,
            vec![
                (vec![JoinPattern::Wait(Expr::ident("c"))], assign("x", 1)),
                (vec![JoinPattern::Timeout], Stmt::skip()),
            ],
        )])?;
        let info = &split.selects[0];
        let guard = split.block(info.guard);
        assert!(guard.is_guard() && guard.middle_of_transition);
        assert_eq!(guard.transfer, Transfer::Select(info.pattern_blocks.clone()));
        for (idx, pattern) in info.pattern_blocks.iter().enumerate() {
            assert_eq!(
                split.block(*pattern).join,
                Some(JoinRef {
                    select: 0,
                    clause: Some(idx)
                })
            );
        }
        Ok(())
    }

    #[test]
    fn malformed_attribute_is_dropped() -> Result<(), LowerError> {
        let (split, session) = split_body(vec![
            assign("x", 1)
                .with_attribute(Attribute::new("", Vec::new()))
                .with_attribute(Attribute::new("Probe", vec!["1".to_owned()])),
        ])?;
        assert_eq!(session.diagnostics().len(), 1);
        let attributed = split
            .blocks
            .iter()
            .find(|b| !b.attributes.is_empty())
            .expect("attributes");
        assert_eq!(attributed.attributes.len(), 1);
        Ok(())
    }
}
