use crate::parser::{self, Unit};
use anyhow::{Context, anyhow, bail};
use log::{debug, trace};
use stepc_core::program::*;

pub(crate) fn build(unit: Unit) -> anyhow::Result<CompilationUnit> {
    let builder = UnitBuilder {
        documents: unit.documents.len(),
    };
    let types = unit
        .types
        .iter()
        .map(|decl| {
            builder
                .type_decl(decl)
                .with_context(|| format!("failed to build type '{}'", decl.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let globals = unit
        .globals
        .iter()
        .map(|global| {
            builder
                .global(global)
                .with_context(|| format!("failed to build global '{}'", global.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let methods = unit
        .methods
        .iter()
        .map(|method| {
            builder
                .method(method)
                .with_context(|| format!("failed to build method '{}'", method.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    debug!(
        "built unit '{}': {} types, {} globals, {} methods",
        unit.name,
        types.len(),
        globals.len(),
        methods.len()
    );
    Ok(CompilationUnit {
        name: unit.name,
        documents: unit.documents,
        types,
        globals,
        methods,
    })
}

struct UnitBuilder {
    documents: usize,
}

impl UnitBuilder {
    fn span(&self, range: Option<parser::SourceRange>) -> anyhow::Result<Span> {
        let Some(range) = range else {
            return Ok(Span::default());
        };
        // Units without a document table use a single anonymous document.
        if usize::from(range.doc) >= self.documents.max(1) {
            bail!("source range refers to unknown document {}", range.doc);
        }
        let end_line = range.end_line.unwrap_or(range.line);
        let end_col = range.end_col.unwrap_or(range.col);
        if (end_line, end_col) < (range.line, range.col) {
            bail!(
                "source range ends at {end_line}:{end_col} before its start {}:{}",
                range.line,
                range.col
            );
        }
        Ok(Span::new(DocId(range.doc), range.line, range.col, end_line, end_col))
    }

    fn type_decl(&self, decl: &parser::TypeDeclaration) -> anyhow::Result<TypeDecl> {
        let kind = match &decl.definition {
            parser::TypeDefinition::Enum { variants } => {
                if variants.is_empty() {
                    bail!("enum without variants");
                }
                TypeDeclKind::Enum(variants.clone())
            }
            parser::TypeDefinition::Range { lo, hi } => {
                if lo > hi {
                    bail!("empty range {lo}..{hi}");
                }
                TypeDeclKind::Range(*lo, *hi)
            }
            parser::TypeDefinition::Struct { fields } => TypeDeclKind::Struct(
                fields
                    .iter()
                    .map(|field| (field.name.clone(), build_type(&field.ty)))
                    .collect(),
            ),
        };
        Ok(TypeDecl {
            name: decl.name.clone(),
            kind,
            span: self.span(decl.span)?,
        })
    }

    fn global(&self, global: &parser::GlobalDeclaration) -> anyhow::Result<Global> {
        Ok(Global {
            name: global.name.clone(),
            ty: build_type(&global.ty),
            init: global.init.as_ref().map(build_value),
            span: self.span(global.span)?,
        })
    }

    fn param(&self, param: &parser::Parameter) -> anyhow::Result<Param> {
        Ok(Param {
            name: param.name.clone(),
            ty: build_type(&param.ty),
            span: self.span(param.span)?,
        })
    }

    fn local(&self, local: &parser::LocalDeclaration) -> anyhow::Result<LocalDecl> {
        Ok(LocalDecl {
            name: local.name.clone(),
            ty: build_type(&local.ty),
            init: local.init.as_ref().map(|e| self.expr(e)).transpose()?,
            span: self.span(local.span)?,
        })
    }

    fn method(&self, method: &parser::MethodDeclaration) -> anyhow::Result<Method> {
        trace!("building method '{}'", method.name);
        Ok(Method {
            name: method.name.clone(),
            params: method
                .params
                .iter()
                .map(|p| self.param(p))
                .collect::<anyhow::Result<_>>()?,
            outputs: method
                .outputs
                .iter()
                .map(|p| self.param(p))
                .collect::<anyhow::Result<_>>()?,
            ret: method.returns.as_ref().map(build_type),
            locals: method
                .locals
                .iter()
                .map(|l| self.local(l))
                .collect::<anyhow::Result<_>>()?,
            body: self.stmts(&method.body)?,
            span: self.span(method.span)?,
        })
    }

    fn stmts(&self, stmts: &[parser::Statement]) -> anyhow::Result<Vec<Stmt>> {
        stmts.iter().map(|s| self.stmt(s)).collect()
    }

    fn boxed(&self, stmt: &parser::Statement) -> anyhow::Result<Box<Stmt>> {
        self.stmt(stmt).map(Box::new)
    }

    fn stmt(&self, stmt: &parser::Statement) -> anyhow::Result<Stmt> {
        use parser::StatementKind as K;
        let span = self.span(stmt.span)?;
        let kind = match &stmt.kind {
            K::Block { locals, body } => StmtKind::Block(Block {
                locals: locals
                    .iter()
                    .map(|l| self.local(l))
                    .collect::<anyhow::Result<_>>()?,
                stmts: self.stmts(body)?,
            }),
            K::Assign { target, value } => StmtKind::Assign(self.expr(target)?, self.expr(value)?),
            K::If {
                cond,
                then,
                otherwise,
            } => StmtKind::If {
                cond: self.expr(cond)?,
                then: self.boxed(then)?,
                otherwise: otherwise.as_deref().map(|s| self.boxed(s)).transpose()?,
            },
            K::While { cond, body } => StmtKind::While {
                cond: self.expr(cond)?,
                body: self.boxed(body)?,
            },
            K::Foreach { var, set, body } => StmtKind::Foreach {
                var: self.local(var)?,
                set: self.expr(set)?,
                body: self.boxed(body)?,
            },
            K::Try { body, handlers } => StmtKind::Try {
                body: self.boxed(body)?,
                handlers: handlers
                    .iter()
                    .map(|h| {
                        Ok(Handler {
                            exception: h.exception.clone(),
                            body: self.stmt(&h.body)?,
                            span: self.span(h.span)?,
                        })
                    })
                    .collect::<anyhow::Result<_>>()?,
            },
            K::Raise { exception } => StmtKind::Raise(exception.clone()),
            K::Goto { label } => StmtKind::Goto(label.clone()),
            K::Labeled { label, body } => StmtKind::Labeled(label.clone(), self.boxed(body)?),
            K::Send { chan, msg } => StmtKind::Send {
                chan: self.expr(chan)?,
                msg: self.expr(msg)?,
            },
            K::Receive { chan, target } => StmtKind::Receive {
                chan: self.expr(chan)?,
                target: self.expr(target)?,
            },
            K::Event {
                code,
                value,
                external,
            } => StmtKind::Event {
                code: self.expr(code)?,
                value: self.expr(value)?,
                external: *external,
            },
            K::Select { end, clauses } => StmtKind::Select(Select {
                end: *end,
                clauses: clauses
                    .iter()
                    .map(|c| {
                        Ok(JoinClause {
                            patterns: c
                                .patterns
                                .iter()
                                .map(|p| self.pattern(p))
                                .collect::<anyhow::Result<_>>()?,
                            body: self.boxed(&c.body)?,
                            span: self.span(c.span)?,
                        })
                    })
                    .collect::<anyhow::Result<_>>()?,
            }),
            K::Atomic { body } => StmtKind::Atomic(self.boxed(body)?),
            K::Yield => StmtKind::Yield,
            K::Call(call) => StmtKind::Call(self.call(call)?),
            K::AsyncCall(call) => StmtKind::AsyncCall(self.call(call)?),
            K::Assert { cond, message } => StmtKind::Assert {
                cond: self.expr(cond)?,
                message: message.clone(),
            },
            K::Assume { cond } => StmtKind::Assume(self.expr(cond)?),
            K::Accept { cond } => StmtKind::Accept(self.expr(cond)?),
            K::Trace { format, args } => StmtKind::Trace {
                format: format.clone(),
                args: self.exprs(args)?,
            },
            K::Return { value } => StmtKind::Return(value.as_ref().map(|v| self.expr(v)).transpose()?),
            K::Skip => StmtKind::Skip,
        };
        Ok(Stmt {
            kind,
            span,
            attributes: stmt
                .attributes
                .iter()
                .map(|a| Attribute::new(a.name.clone(), a.args.clone()))
                .collect(),
        })
    }

    fn pattern(&self, pattern: &parser::Pattern) -> anyhow::Result<JoinPattern> {
        Ok(match pattern {
            parser::Pattern::Receive { chan, target } => JoinPattern::Receive {
                chan: self.expr(chan)?,
                target: self.expr(target)?,
            },
            parser::Pattern::Wait { cond } => JoinPattern::Wait(self.expr(cond)?),
            parser::Pattern::Timeout => JoinPattern::Timeout,
            parser::Pattern::Event {
                code,
                value,
                external,
            } => JoinPattern::Event {
                code: self.expr(code)?,
                value: self.expr(value)?,
                external: *external,
            },
        })
    }

    fn call(&self, call: &parser::CallDeclaration) -> anyhow::Result<Call> {
        Ok(Call {
            callee: call.callee.clone(),
            receiver: call.receiver.as_ref().map(|r| self.expr(r)).transpose()?,
            args: self.exprs(&call.args)?,
            outputs: self.exprs(&call.outputs)?,
            result: call.result.as_ref().map(|r| self.expr(r)).transpose()?,
        })
    }

    fn exprs(&self, exprs: &[parser::Expression]) -> anyhow::Result<Vec<Expr>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn boxed_expr(&self, expr: &parser::Expression) -> anyhow::Result<Box<Expr>> {
        self.expr(expr).map(Box::new)
    }

    fn expr(&self, expr: &parser::Expression) -> anyhow::Result<Expr> {
        use parser::ExpressionKind as K;
        let kind = match &expr.kind {
            K::Const { value } => ExprKind::Const(build_value(value)),
            K::Ident { name } => {
                if name.is_empty() {
                    return Err(anyhow!("empty identifier"));
                }
                ExprKind::Ident(name.clone())
            }
            K::Field { base, field } => ExprKind::Field(self.boxed_expr(base)?, field.clone()),
            K::EnumLit { ty, variant } => ExprKind::EnumLit(ty.clone(), variant.clone()),
            K::Unary { op, arg } => ExprKind::Unary(
                match op {
                    parser::UnaryOp::Not => UnOp::Not,
                    parser::UnaryOp::Neg => UnOp::Neg,
                },
                self.boxed_expr(arg)?,
            ),
            K::Binary { op, left, right } => {
                ExprKind::Binary(bin_op(*op), self.boxed_expr(left)?, self.boxed_expr(right)?)
            }
            K::Set { items } => ExprKind::SetLit(self.exprs(items)?),
            K::In { elem, set } => ExprKind::In(self.boxed_expr(elem)?, self.boxed_expr(set)?),
            K::Size { set } => ExprKind::Size(self.boxed_expr(set)?),
            K::Choose { domain } => ExprKind::Choose(match domain {
                parser::Domain::Bool => ChooseDomain::Bool,
                parser::Domain::Type { name } => ChooseDomain::Type(name.clone()),
                parser::Domain::Set { set } => ChooseDomain::Set(self.boxed_expr(set)?),
            }),
        };
        Ok(Expr::new(kind, self.span(expr.span)?))
    }
}

fn bin_op(op: parser::BinaryOp) -> BinOp {
    use parser::BinaryOp as B;
    match op {
        B::Add => BinOp::Add,
        B::Sub => BinOp::Sub,
        B::Mul => BinOp::Mul,
        B::Div => BinOp::Div,
        B::Mod => BinOp::Mod,
        B::Eq => BinOp::Eq,
        B::Ne => BinOp::Ne,
        B::Lt => BinOp::Lt,
        B::Le => BinOp::Le,
        B::Gt => BinOp::Gt,
        B::Ge => BinOp::Ge,
        B::And => BinOp::And,
        B::Or => BinOp::Or,
    }
}

fn build_type(ty: &parser::TypeExpression) -> Type {
    match ty {
        parser::TypeExpression::Bool => Type::Bool,
        parser::TypeExpression::Int => Type::Int,
        parser::TypeExpression::Named { name } => Type::Named(name.clone()),
        parser::TypeExpression::Set { of } => Type::Set(Box::new(build_type(of))),
        parser::TypeExpression::Chan { of } => Type::Chan(Box::new(build_type(of))),
    }
}

fn build_value(value: &parser::Value) -> Val {
    match value {
        parser::Value::Bool(b) => Val::Bool(*b),
        parser::Value::Int(i) => Val::Int(*i),
        parser::Value::Set(items) => Val::Set(items.iter().map(build_value).collect()),
        parser::Value::Chan { chan } => Val::Chan(*chan),
        parser::Value::Struct { fields } => Val::Struct(
            fields
                .iter()
                .map(|f| (f.name.clone(), build_value(&f.value)))
                .collect(),
        ),
    }
}
