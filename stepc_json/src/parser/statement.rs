use serde::Deserialize;

use super::{Expression, Identifier, LocalDeclaration, SourceRange};

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Statement {
    #[serde(flatten)]
    pub(crate) kind: StatementKind,
    #[serde(default)]
    pub(crate) span: Option<SourceRange>,
    #[serde(default)]
    pub(crate) attributes: Vec<AttributeDeclaration>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AttributeDeclaration {
    pub(crate) name: Identifier,
    #[serde(default)]
    pub(crate) args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub(crate) enum StatementKind {
    Block {
        #[serde(default)]
        locals: Vec<LocalDeclaration>,
        body: Vec<Statement>,
    },
    Assign {
        target: Expression,
        value: Expression,
    },
    If {
        cond: Expression,
        then: Box<Statement>,
        #[serde(default, rename = "else")]
        otherwise: Option<Box<Statement>>,
    },
    While {
        cond: Expression,
        body: Box<Statement>,
    },
    Foreach {
        var: LocalDeclaration,
        set: Expression,
        body: Box<Statement>,
    },
    Try {
        body: Box<Statement>,
        handlers: Vec<HandlerDeclaration>,
    },
    Raise {
        exception: Identifier,
    },
    Goto {
        label: Identifier,
    },
    Labeled {
        label: Identifier,
        body: Box<Statement>,
    },
    Send {
        chan: Expression,
        msg: Expression,
    },
    Receive {
        chan: Expression,
        target: Expression,
    },
    Event {
        code: Expression,
        value: Expression,
        #[serde(default)]
        external: bool,
    },
    Select {
        /// the select is a valid end state
        #[serde(default)]
        end: bool,
        clauses: Vec<ClauseDeclaration>,
    },
    Atomic {
        body: Box<Statement>,
    },
    Yield,
    Call(CallDeclaration),
    AsyncCall(CallDeclaration),
    Assert {
        cond: Expression,
        #[serde(default)]
        message: Option<String>,
    },
    Assume {
        cond: Expression,
    },
    Accept {
        cond: Expression,
    },
    Trace {
        format: String,
        #[serde(default)]
        args: Vec<Expression>,
    },
    Return {
        #[serde(default)]
        value: Option<Expression>,
    },
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HandlerDeclaration {
    /// the caught exception, missing for the default handler
    #[serde(default)]
    pub(crate) exception: Option<Identifier>,
    pub(crate) body: Statement,
    #[serde(default)]
    pub(crate) span: Option<SourceRange>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClauseDeclaration {
    pub(crate) patterns: Vec<Pattern>,
    pub(crate) body: Statement,
    #[serde(default)]
    pub(crate) span: Option<SourceRange>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub(crate) enum Pattern {
    Receive {
        chan: Expression,
        target: Expression,
    },
    Wait {
        cond: Expression,
    },
    Timeout,
    Event {
        code: Expression,
        value: Expression,
        #[serde(default)]
        external: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CallDeclaration {
    pub(crate) callee: Identifier,
    #[serde(default)]
    pub(crate) receiver: Option<Expression>,
    #[serde(default)]
    pub(crate) args: Vec<Expression>,
    /// places receiving the output parameters
    #[serde(default)]
    pub(crate) outputs: Vec<Expression>,
    /// place receiving the return value
    #[serde(default)]
    pub(crate) result: Option<Expression>,
}
