use serde::Deserialize;

use super::{Identifier, SourceRange};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub(crate) enum TypeExpression {
    Bool,
    Int,
    /// a declared enum, range or struct type
    Named { name: Identifier },
    Set { of: Box<TypeExpression> },
    Chan { of: Box<TypeExpression> },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct TypeDeclaration {
    pub(crate) name: Identifier,
    #[serde(flatten)]
    pub(crate) definition: TypeDefinition,
    #[serde(default)]
    pub(crate) span: Option<SourceRange>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub(crate) enum TypeDefinition {
    Enum {
        variants: Vec<Identifier>,
    },
    /// inclusive integer range
    Range {
        lo: i64,
        hi: i64,
    },
    Struct {
        fields: Vec<FieldDeclaration>,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct FieldDeclaration {
    pub(crate) name: Identifier,
    #[serde(rename = "type")]
    pub(crate) ty: TypeExpression,
}
