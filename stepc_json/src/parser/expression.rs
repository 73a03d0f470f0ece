use serde::Deserialize;

use super::{Identifier, SourceRange};

/// Constant values: booleans, integers, sets, channel references and struct values.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Value {
    Bool(bool),
    Int(i64),
    Set(Vec<Value>),
    /// `{ "chan": null }` for the unbound channel
    Chan { chan: Option<u32> },
    Struct { fields: Vec<FieldValue> },
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FieldValue {
    pub(crate) name: Identifier,
    pub(crate) value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Expression {
    #[serde(flatten)]
    pub(crate) kind: ExpressionKind,
    #[serde(default)]
    pub(crate) span: Option<SourceRange>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub(crate) enum ExpressionKind {
    Const {
        value: Value,
    },
    Ident {
        name: Identifier,
    },
    Field {
        base: Box<Expression>,
        field: Identifier,
    },
    /// `Type.Variant`
    EnumLit {
        #[serde(rename = "type")]
        ty: Identifier,
        variant: Identifier,
    },
    Unary {
        op: UnaryOp,
        arg: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Set {
        items: Vec<Expression>,
    },
    /// set membership
    In {
        elem: Box<Expression>,
        set: Box<Expression>,
    },
    Size {
        set: Box<Expression>,
    },
    Choose {
        domain: Domain,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// The domain of a nondeterministic choice.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub(crate) enum Domain {
    Bool,
    /// a named enum or range type
    Type { name: Identifier },
    Set { set: Box<Expression> },
}
