//! Declared types of a compilation unit and their runtime representation.

use crate::error::LowerError;
use crate::program::{Ident, Integer, Type, TypeDecl, TypeDeclKind, Val};
use hashbrown::{HashMap, HashSet};
use serde::Serialize;
use std::collections::BTreeSet;

/// The representation of a declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TypeDef {
    /// Variants in declaration order; values are their ordinals.
    Enum(Vec<Ident>),
    /// Inclusive integer range.
    Range(Integer, Integer),
    /// Fields in declaration order.
    Struct(Vec<(Ident, Type)>),
}

/// Name table of the declared types.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    defs: HashMap<Ident, TypeDef>,
}

impl TypeTable {
    pub fn new(decls: &[TypeDecl]) -> Result<Self, LowerError> {
        let mut defs = HashMap::with_capacity(decls.len());
        for decl in decls {
            let def = match &decl.kind {
                TypeDeclKind::Enum(variants) => TypeDef::Enum(variants.clone()),
                TypeDeclKind::Range(lo, hi) => TypeDef::Range(*lo, *hi),
                TypeDeclKind::Struct(fields) => TypeDef::Struct(fields.clone()),
            };
            if defs.insert(decl.name.clone(), def).is_some() {
                return Err(LowerError::DuplicateSymbol(decl.name.clone()));
            }
        }
        let table = Self { defs };
        // Every type mentioned in a declaration has to be known.
        for decl in decls {
            if let TypeDeclKind::Struct(fields) = &decl.kind {
                for (_, ty) in fields {
                    table.check(ty)?;
                }
            }
        }
        let mut finite = HashSet::new();
        for decl in decls {
            table.check_finite(&decl.name, &mut Vec::new(), &mut finite)?;
        }
        Ok(table)
    }

    /// Depth-first walk of the struct fields held by value.
    /// Sets and channels hold their elements apart, so they end the walk.
    fn check_finite(
        &self,
        name: &str,
        path: &mut Vec<Ident>,
        finite: &mut HashSet<Ident>,
    ) -> Result<(), LowerError> {
        if finite.contains(name) {
            return Ok(());
        }
        if path.iter().any(|outer| outer == name) {
            return Err(LowerError::RecursiveType(name.to_owned()));
        }
        if let TypeDef::Struct(fields) = self.get(name)? {
            path.push(name.to_owned());
            for (_, ty) in fields {
                if let Type::Named(field) = ty {
                    self.check_finite(field, path, finite)?;
                }
            }
            path.pop();
        }
        finite.insert(name.to_owned());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&TypeDef, LowerError> {
        self.defs
            .get(name)
            .ok_or_else(|| LowerError::UnknownType(name.to_owned()))
    }

    /// Checks that every named type occurring in `ty` is declared.
    pub fn check(&self, ty: &Type) -> Result<(), LowerError> {
        match ty {
            Type::Bool | Type::Int => Ok(()),
            Type::Named(name) => self.get(name).map(|_| ()),
            Type::Set(t) | Type::Chan(t) => self.check(t),
        }
    }

    /// The zero value of a type, which is what scope cleanup resets locals to.
    ///
    /// ```
    /// # use stepc_core::program::{Type, Val};
    /// # use stepc_core::types::TypeTable;
    /// let types = TypeTable::default();
    /// assert_eq!(types.zero(&Type::Bool).unwrap(), Val::Bool(false));
    /// assert_eq!(types.zero(&Type::Chan(Box::new(Type::Int))).unwrap(), Val::Chan(None));
    /// ```
    pub fn zero(&self, ty: &Type) -> Result<Val, LowerError> {
        match ty {
            Type::Bool => Ok(Val::Bool(false)),
            Type::Int => Ok(Val::Int(0)),
            Type::Named(name) => match self.get(name)? {
                TypeDef::Enum(_) | TypeDef::Range(..) => Ok(Val::Int(0)),
                TypeDef::Struct(fields) => fields
                    .iter()
                    .map(|(field, ty)| self.zero(ty).map(|val| (field.clone(), val)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Val::Struct),
            },
            Type::Set(_) => Ok(Val::Set(BTreeSet::new())),
            Type::Chan(_) => Ok(Val::Chan(None)),
        }
    }

    /// Ordinal of an enum variant, which is its runtime value.
    pub fn enum_ordinal(&self, ty: &str, variant: &str) -> Result<Integer, LowerError> {
        match self.get(ty)? {
            TypeDef::Enum(variants) => variants
                .iter()
                .position(|v| v == variant)
                .map(|pos| pos as Integer)
                .ok_or_else(|| LowerError::UnknownVariant(ty.to_owned(), variant.to_owned())),
            _ => Err(LowerError::UnknownVariant(ty.to_owned(), variant.to_owned())),
        }
    }

    /// Type of the field of a struct type.
    pub fn field_type(&self, ty: &Type, field: &str) -> Option<&Type> {
        let Type::Named(name) = ty else {
            return None;
        };
        match self.defs.get(name.as_str())? {
            TypeDef::Struct(fields) => fields.iter().find(|(f, _)| f == field).map(|(_, t)| t),
            _ => None,
        }
    }

    /// Whether a value inhabits a type.
    ///
    /// Receiving from a channel requires the message to inhabit the type of the target.
    pub fn has_type(&self, val: &Val, ty: &Type) -> bool {
        match (val, ty) {
            (Val::Bool(_), Type::Bool) | (Val::Int(_), Type::Int) | (Val::Chan(_), Type::Chan(_)) => {
                true
            }
            (Val::Set(items), Type::Set(t)) => items.iter().all(|item| self.has_type(item, t)),
            (val, Type::Named(name)) => match (val, self.defs.get(name.as_str())) {
                (Val::Int(i), Some(TypeDef::Enum(variants))) => {
                    *i >= 0 && (*i as usize) < variants.len()
                }
                (Val::Int(i), Some(TypeDef::Range(lo, hi))) => lo <= i && i <= hi,
                (Val::Struct(vals), Some(TypeDef::Struct(fields))) => {
                    vals.len() == fields.len()
                        && vals
                            .iter()
                            .zip(fields)
                            .all(|((vf, v), (f, t))| vf == f && self.has_type(v, t))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Span;

    fn decls() -> Vec<TypeDecl> {
        vec![
            TypeDecl {
                name: "Color".to_owned(),
                kind: TypeDeclKind::Enum(vec!["Red".to_owned(), "Green".to_owned()]),
                span: Span::default(),
            },
            TypeDecl {
                name: "Small".to_owned(),
                kind: TypeDeclKind::Range(1, 3),
                span: Span::default(),
            },
            TypeDecl {
                name: "Pair".to_owned(),
                kind: TypeDeclKind::Struct(vec![
                    ("c".to_owned(), Type::Named("Color".to_owned())),
                    ("ok".to_owned(), Type::Bool),
                ]),
                span: Span::default(),
            },
        ]
    }

    #[test]
    fn zero_values() -> Result<(), LowerError> {
        let types = TypeTable::new(&decls())?;
        assert_eq!(
            types.zero(&Type::Named("Pair".to_owned()))?,
            Val::Struct(vec![
                ("c".to_owned(), Val::Int(0)),
                ("ok".to_owned(), Val::Bool(false))
            ])
        );
        assert_eq!(
            types.zero(&Type::Set(Box::new(Type::Int)))?,
            Val::Set(BTreeSet::new())
        );
        Ok(())
    }

    #[test]
    fn ordinals() -> Result<(), LowerError> {
        let types = TypeTable::new(&decls())?;
        assert_eq!(types.enum_ordinal("Color", "Green")?, 1);
        assert!(matches!(
            types.enum_ordinal("Color", "Blue"),
            Err(LowerError::UnknownVariant(..))
        ));
        assert!(matches!(
            types.enum_ordinal("Small", "Red"),
            Err(LowerError::UnknownVariant(..))
        ));
        Ok(())
    }

    #[test]
    fn inhabitation() -> Result<(), LowerError> {
        let types = TypeTable::new(&decls())?;
        let small = Type::Named("Small".to_owned());
        assert!(types.has_type(&Val::Int(2), &small));
        assert!(!types.has_type(&Val::Int(0), &small));
        assert!(!types.has_type(&Val::Bool(true), &Type::Int));
        assert!(types.has_type(
            &Val::Set(BTreeSet::from([Val::Int(1)])),
            &Type::Set(Box::new(Type::Int))
        ));
        Ok(())
    }

    #[test]
    fn struct_containing_itself() {
        let node = |name: &str, field: Type| TypeDecl {
            name: name.to_owned(),
            kind: TypeDeclKind::Struct(vec![("next".to_owned(), field)]),
            span: Span::default(),
        };
        let named = |name: &str| Type::Named(name.to_owned());
        assert!(matches!(
            TypeTable::new(&[node("S", named("S"))]),
            Err(LowerError::RecursiveType(name)) if name == "S"
        ));
        assert!(matches!(
            TypeTable::new(&[node("A", named("B")), node("B", named("A"))]),
            Err(LowerError::RecursiveType(_))
        ));
        // Through a set the nesting is finite.
        let list = TypeTable::new(&[node("L", Type::Set(Box::new(named("L"))))])
            .expect("set of itself");
        assert_eq!(
            list.zero(&named("L")),
            Ok(Val::Struct(vec![("next".to_owned(), Val::Set(BTreeSet::new()))]))
        );
    }

    #[test]
    fn unknown_field_type() {
        let mut decls = decls();
        decls.push(TypeDecl {
            name: "Bad".to_owned(),
            kind: TypeDeclKind::Struct(vec![("x".to_owned(), Type::Named("Nope".to_owned()))]),
            span: Span::default(),
        });
        assert!(matches!(
            TypeTable::new(&decls),
            Err(LowerError::UnknownType(name)) if name == "Nope"
        ));
    }
}
