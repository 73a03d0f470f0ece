use serde::Deserialize;

mod expression;
mod statement;
mod unit_type;

pub(crate) use expression::*;
pub(crate) use statement::*;
pub(crate) use unit_type::*;

pub(crate) type Identifier = String;

/// A compilation unit as handed over by the front end.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Unit {
    /// the name of the unit, defaults to the file stem
    #[serde(default)]
    pub(crate) name: String,
    /// source file names, indexed by the `doc` field of source ranges
    #[serde(default)]
    pub(crate) documents: Vec<String>,
    #[serde(default)]
    pub(crate) types: Vec<TypeDeclaration>,
    #[serde(default)]
    pub(crate) globals: Vec<GlobalDeclaration>,
    pub(crate) methods: Vec<MethodDeclaration>,
}

/// A source range.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct SourceRange {
    #[serde(default)]
    pub(crate) doc: u16,
    pub(crate) line: u32,
    #[serde(default)]
    pub(crate) col: u32,
    /// defaults to `line`
    #[serde(default)]
    pub(crate) end_line: Option<u32>,
    /// defaults to `col`
    #[serde(default)]
    pub(crate) end_col: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct GlobalDeclaration {
    pub(crate) name: Identifier,
    #[serde(rename = "type")]
    pub(crate) ty: TypeExpression,
    /// initial value, the zero value of the type if missing
    #[serde(default)]
    pub(crate) init: Option<Value>,
    #[serde(default)]
    pub(crate) span: Option<SourceRange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Parameter {
    pub(crate) name: Identifier,
    #[serde(rename = "type")]
    pub(crate) ty: TypeExpression,
    #[serde(default)]
    pub(crate) span: Option<SourceRange>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct LocalDeclaration {
    pub(crate) name: Identifier,
    #[serde(rename = "type")]
    pub(crate) ty: TypeExpression,
    #[serde(default)]
    pub(crate) init: Option<Expression>,
    #[serde(default)]
    pub(crate) span: Option<SourceRange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct MethodDeclaration {
    pub(crate) name: Identifier,
    #[serde(default)]
    pub(crate) params: Vec<Parameter>,
    #[serde(default)]
    pub(crate) outputs: Vec<Parameter>,
    /// the return type, if the method returns a value
    #[serde(default)]
    pub(crate) returns: Option<TypeExpression>,
    /// method-level locals
    #[serde(default)]
    pub(crate) locals: Vec<LocalDeclaration>,
    pub(crate) body: Vec<Statement>,
    #[serde(default)]
    pub(crate) span: Option<SourceRange>,
}
